//! The bootstrap schema: core (RFC 4519), cosine, inetOrgPerson, the operational
//! attributes of RFC 4512 and RFC 4530, and the subentry, access control and
//! collective attribute definitions of X.501 and RFC 3671.

use crate::prelude::*;
use crate::schema::{AttributeUsage, ClassKind, SchemaAttribute, SchemaClass};
use crate::value::{MatchingRule, SyntaxType};

use AttributeUsage::{DirectoryOperation, DsaOperation};

pub fn system_attributes() -> Vec<SchemaAttribute> {
    vec![
        // core
        SchemaAttribute::new("2.5.4.0", &[ATTR_OBJECTCLASS], SyntaxType::Oid)
            .description("The object classes of an entry"),
        SchemaAttribute::new("2.5.4.1", &[ATTR_ALIASED_OBJECT_NAME, "aliasedEntryName"], SyntaxType::Dn)
            .single_value(),
        SchemaAttribute::new("2.5.4.41", &["name"], SyntaxType::DirectoryString)
            .substring(MatchingRule::CaseIgnoreMatch),
        SchemaAttribute::new("2.5.4.3", &[ATTR_CN, "commonName"], SyntaxType::DirectoryString).sup("name"),
        SchemaAttribute::new("2.5.4.4", &[ATTR_SN, "surname"], SyntaxType::DirectoryString).sup("name"),
        SchemaAttribute::new("2.5.4.6", &[ATTR_C, "countryName"], SyntaxType::DirectoryString)
            .single_value()
            .sup("name"),
        SchemaAttribute::new("2.5.4.7", &[ATTR_L, "localityName"], SyntaxType::DirectoryString).sup("name"),
        SchemaAttribute::new("2.5.4.8", &[ATTR_ST, "stateOrProvinceName"], SyntaxType::DirectoryString)
            .sup("name"),
        SchemaAttribute::new("2.5.4.9", &[ATTR_STREET, "streetAddress"], SyntaxType::DirectoryString),
        SchemaAttribute::new("2.5.4.10", &[ATTR_O, "organizationName"], SyntaxType::DirectoryString)
            .sup("name"),
        SchemaAttribute::new("2.5.4.11", &[ATTR_OU, "organizationalUnitName"], SyntaxType::DirectoryString)
            .sup("name"),
        SchemaAttribute::new("2.5.4.12", &[ATTR_TITLE], SyntaxType::DirectoryString).sup("name"),
        SchemaAttribute::new("2.5.4.13", &[ATTR_DESCRIPTION], SyntaxType::DirectoryString),
        SchemaAttribute::new("2.5.4.17", &[ATTR_POSTAL_CODE], SyntaxType::DirectoryString),
        SchemaAttribute::new("2.5.4.20", &[ATTR_TELEPHONE_NUMBER], SyntaxType::TelephoneNumber),
        SchemaAttribute::new("2.5.4.31", &[ATTR_MEMBER], SyntaxType::Dn).sup("distinguishedName"),
        SchemaAttribute::new("2.5.4.32", &[ATTR_OWNER], SyntaxType::Dn).sup("distinguishedName"),
        SchemaAttribute::new("2.5.4.34", &[ATTR_SEE_ALSO], SyntaxType::Dn).sup("distinguishedName"),
        SchemaAttribute::new("2.5.4.35", &[ATTR_USER_PASSWORD], SyntaxType::OctetString),
        SchemaAttribute::new("2.5.4.42", &[ATTR_GIVEN_NAME, "gn"], SyntaxType::DirectoryString).sup("name"),
        SchemaAttribute::new("2.5.4.49", &["distinguishedName"], SyntaxType::Dn),
        SchemaAttribute::new("2.5.4.50", &[ATTR_UNIQUE_MEMBER], SyntaxType::Dn),
        // cosine and inetOrgPerson
        SchemaAttribute::new("0.9.2342.19200300.100.1.1", &[ATTR_UID, "userid"], SyntaxType::DirectoryString),
        SchemaAttribute::new("0.9.2342.19200300.100.1.3", &[ATTR_MAIL, "rfc822Mailbox"], SyntaxType::Ia5String),
        SchemaAttribute::new("0.9.2342.19200300.100.1.25", &[ATTR_DC, "domainComponent"], SyntaxType::Ia5String)
            .single_value(),
        SchemaAttribute::new("0.9.2342.19200300.100.1.60", &[ATTR_JPEG_PHOTO], SyntaxType::OctetString),
        SchemaAttribute::new("2.16.840.1.113730.3.1.3", &[ATTR_EMPLOYEE_NUMBER], SyntaxType::DirectoryString)
            .single_value(),
        SchemaAttribute::new("2.16.840.1.113730.3.1.241", &[ATTR_DISPLAY_NAME], SyntaxType::DirectoryString)
            .single_value(),
        // referrals, RFC 3296
        SchemaAttribute::new("2.16.840.1.113730.3.1.34", &[ATTR_REF], SyntaxType::DirectoryString)
            .equality(MatchingRule::CaseExactMatch)
            .usage(AttributeUsage::DistributedOperation),
        // operational
        SchemaAttribute::new("2.5.18.1", &[ATTR_CREATE_TIMESTAMP], SyntaxType::GeneralizedTime)
            .single_value()
            .no_user_modification()
            .usage(DirectoryOperation),
        SchemaAttribute::new("2.5.18.2", &[ATTR_MODIFY_TIMESTAMP], SyntaxType::GeneralizedTime)
            .single_value()
            .no_user_modification()
            .usage(DirectoryOperation),
        SchemaAttribute::new("2.5.18.3", &[ATTR_CREATORS_NAME], SyntaxType::Dn)
            .single_value()
            .no_user_modification()
            .usage(DirectoryOperation),
        SchemaAttribute::new("2.5.18.4", &[ATTR_MODIFIERS_NAME], SyntaxType::Dn)
            .single_value()
            .no_user_modification()
            .usage(DirectoryOperation),
        SchemaAttribute::new("2.5.18.5", &[ATTR_ADMINISTRATIVE_ROLE], SyntaxType::Oid)
            .usage(DirectoryOperation),
        SchemaAttribute::new("2.5.18.6", &[ATTR_SUBTREE_SPECIFICATION], SyntaxType::Json)
            .single_value()
            .usage(DirectoryOperation),
        SchemaAttribute::new("2.5.18.7", &[ATTR_COLLECTIVE_EXCLUSIONS], SyntaxType::Oid)
            .usage(DirectoryOperation),
        SchemaAttribute::new("2.5.18.10", &[ATTR_SUBSCHEMA_SUBENTRY], SyntaxType::Dn)
            .single_value()
            .no_user_modification()
            .usage(DirectoryOperation),
        SchemaAttribute::new("2.5.18.11", &[ATTR_ACCESS_CONTROL_SUBENTRIES], SyntaxType::Dn)
            .no_user_modification()
            .usage(DirectoryOperation),
        SchemaAttribute::new("2.5.18.12", &[ATTR_COLLECTIVE_ATTRIBUTE_SUBENTRIES], SyntaxType::Dn)
            .no_user_modification()
            .usage(DirectoryOperation),
        SchemaAttribute::new("1.3.6.1.1.16.4", &[ATTR_ENTRY_UUID], SyntaxType::Uuid)
            .single_value()
            .no_user_modification()
            .usage(DirectoryOperation),
        SchemaAttribute::new("1.3.6.1.4.1.4203.666.1.7", &[ATTR_ENTRY_CSN], SyntaxType::Csn)
            .single_value()
            .no_user_modification()
            .usage(DirectoryOperation),
        SchemaAttribute::new("1.3.6.1.4.1.18060.0.4.1.2.31", &[ATTR_ENTRY_DELETED], SyntaxType::Boolean)
            .single_value()
            .usage(DirectoryOperation),
        // access control, X.501 and ACI items held as JSON
        SchemaAttribute::new("2.5.24.4", &[ATTR_PRESCRIPTIVE_ACI], SyntaxType::Json)
            .usage(DirectoryOperation),
        SchemaAttribute::new("2.5.24.5", &[ATTR_ENTRY_ACI], SyntaxType::Json).usage(DirectoryOperation),
        SchemaAttribute::new("2.5.24.6", &[ATTR_SUBENTRY_ACI], SyntaxType::Json).usage(DirectoryOperation),
        // root DSE
        SchemaAttribute::new("1.3.6.1.4.1.1466.101.120.5", &[ATTR_NAMING_CONTEXTS], SyntaxType::Dn)
            .usage(DsaOperation),
        SchemaAttribute::new("1.3.6.1.4.1.1466.101.120.13", &[ATTR_SUPPORTED_CONTROL], SyntaxType::Oid)
            .usage(DsaOperation),
        SchemaAttribute::new("1.3.6.1.4.1.1466.101.120.15", &[ATTR_SUPPORTED_LDAP_VERSION], SyntaxType::Integer)
            .usage(DsaOperation),
        SchemaAttribute::new("1.3.6.1.1.4", &[ATTR_VENDOR_NAME], SyntaxType::DirectoryString)
            .single_value()
            .no_user_modification()
            .usage(DsaOperation),
        SchemaAttribute::new("1.3.6.1.1.5", &[ATTR_VENDOR_VERSION], SyntaxType::DirectoryString)
            .single_value()
            .no_user_modification()
            .usage(DsaOperation),
        // collective, RFC 3671
        SchemaAttribute::new("2.5.4.7.1", &[ATTR_C_L], SyntaxType::DirectoryString)
            .collective()
            .sup(ATTR_L),
        SchemaAttribute::new("2.5.4.8.1", &[ATTR_C_ST], SyntaxType::DirectoryString)
            .collective()
            .sup(ATTR_ST),
        SchemaAttribute::new("2.5.4.9.1", &[ATTR_C_STREET], SyntaxType::DirectoryString)
            .collective()
            .sup(ATTR_STREET),
        SchemaAttribute::new("2.5.4.10.1", &[ATTR_C_O], SyntaxType::DirectoryString)
            .collective()
            .sup(ATTR_O),
        SchemaAttribute::new("2.5.4.11.1", &[ATTR_C_OU], SyntaxType::DirectoryString)
            .collective()
            .sup(ATTR_OU),
        SchemaAttribute::new("2.5.4.17.1", &[ATTR_C_POSTAL_CODE], SyntaxType::DirectoryString)
            .collective()
            .sup(ATTR_POSTAL_CODE),
        SchemaAttribute::new("2.5.4.20.1", &[ATTR_C_TELEPHONE_NUMBER], SyntaxType::TelephoneNumber)
            .collective()
            .sup(ATTR_TELEPHONE_NUMBER),
    ]
}

pub fn system_classes() -> Vec<SchemaClass> {
    use ClassKind::*;
    vec![
        SchemaClass::new("2.5.6.0", &[CLASS_TOP], Abstract).must(&[ATTR_OBJECTCLASS]),
        SchemaClass::new("2.5.6.1", &[CLASS_ALIAS], Structural)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_ALIASED_OBJECT_NAME]),
        SchemaClass::new("2.5.6.2", &[CLASS_COUNTRY], Structural)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_C])
            .may(&[ATTR_DESCRIPTION, ATTR_SEE_ALSO]),
        SchemaClass::new("2.5.6.3", &[CLASS_LOCALITY], Structural)
            .sup(&[CLASS_TOP])
            .may(&[ATTR_L, ATTR_ST, ATTR_STREET, ATTR_DESCRIPTION, ATTR_SEE_ALSO]),
        SchemaClass::new("2.5.6.4", &[CLASS_ORGANIZATION], Structural)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_O])
            .may(&[
                ATTR_DESCRIPTION,
                ATTR_L,
                ATTR_ST,
                ATTR_STREET,
                ATTR_POSTAL_CODE,
                ATTR_TELEPHONE_NUMBER,
                ATTR_SEE_ALSO,
                ATTR_USER_PASSWORD,
            ]),
        SchemaClass::new("2.5.6.5", &[CLASS_ORGANIZATIONAL_UNIT], Structural)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_OU])
            .may(&[
                ATTR_DESCRIPTION,
                ATTR_L,
                ATTR_ST,
                ATTR_STREET,
                ATTR_POSTAL_CODE,
                ATTR_TELEPHONE_NUMBER,
                ATTR_SEE_ALSO,
                ATTR_USER_PASSWORD,
            ]),
        SchemaClass::new("2.5.6.6", &[CLASS_PERSON], Structural)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_SN, ATTR_CN])
            .may(&[
                ATTR_USER_PASSWORD,
                ATTR_TELEPHONE_NUMBER,
                ATTR_SEE_ALSO,
                ATTR_DESCRIPTION,
            ]),
        SchemaClass::new("2.5.6.7", &[CLASS_ORGANIZATIONAL_PERSON], Structural)
            .sup(&[CLASS_PERSON])
            .may(&[
                ATTR_TITLE,
                ATTR_OU,
                ATTR_L,
                ATTR_ST,
                ATTR_STREET,
                ATTR_POSTAL_CODE,
            ]),
        SchemaClass::new("2.5.6.8", &[CLASS_ORGANIZATIONAL_ROLE], Structural)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_CN])
            .may(&[
                ATTR_DESCRIPTION,
                ATTR_OU,
                ATTR_L,
                ATTR_TELEPHONE_NUMBER,
                ATTR_SEE_ALSO,
            ]),
        SchemaClass::new("2.5.6.9", &[CLASS_GROUP_OF_NAMES], Structural)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_MEMBER, ATTR_CN])
            .may(&[ATTR_DESCRIPTION, ATTR_O, ATTR_OU, ATTR_OWNER, ATTR_SEE_ALSO]),
        SchemaClass::new("2.5.6.17", &[CLASS_GROUP_OF_UNIQUE_NAMES], Structural)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_UNIQUE_MEMBER, ATTR_CN])
            .may(&[ATTR_DESCRIPTION, ATTR_O, ATTR_OU, ATTR_OWNER, ATTR_SEE_ALSO]),
        SchemaClass::new("2.16.840.1.113730.3.2.2", &[CLASS_INET_ORG_PERSON], Structural)
            .sup(&[CLASS_ORGANIZATIONAL_PERSON])
            .may(&[
                ATTR_UID,
                ATTR_MAIL,
                ATTR_GIVEN_NAME,
                ATTR_DISPLAY_NAME,
                ATTR_EMPLOYEE_NUMBER,
                ATTR_JPEG_PHOTO,
            ]),
        SchemaClass::new("0.9.2342.19200300.100.4.13", &[CLASS_DOMAIN], Structural)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_DC])
            .may(&[
                ATTR_DESCRIPTION,
                ATTR_O,
                ATTR_L,
                ATTR_ST,
                ATTR_STREET,
                ATTR_SEE_ALSO,
            ]),
        SchemaClass::new("1.3.6.1.4.1.1466.344", &[CLASS_DC_OBJECT], Auxiliary)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_DC]),
        SchemaClass::new("1.3.6.1.1.3.1", &[CLASS_UID_OBJECT], Auxiliary)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_UID]),
        SchemaClass::new(
            "1.3.6.1.4.1.1466.101.120.111",
            &[CLASS_EXTENSIBLE_OBJECT],
            Auxiliary,
        )
        .sup(&[CLASS_TOP]),
        SchemaClass::new("2.16.840.1.113730.3.2.6", &[CLASS_REFERRAL], Structural)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_REF]),
        SchemaClass::new("2.5.17.0", &[CLASS_SUBENTRY], Structural)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_CN, ATTR_SUBTREE_SPECIFICATION]),
        SchemaClass::new("2.5.17.1", &[CLASS_ACCESS_CONTROL_SUBENTRY], Auxiliary)
            .sup(&[CLASS_TOP])
            .must(&[ATTR_PRESCRIPTIVE_ACI]),
        SchemaClass::new("2.5.17.2", &[CLASS_COLLECTIVE_ATTRIBUTE_SUBENTRY], Auxiliary)
            .sup(&[CLASS_TOP]),
    ]
}
