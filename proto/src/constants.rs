//! Well known attribute type names, object class names and DNs.
//!
//! Attribute and class names are matched case insensitively by the schema, the
//! values here are the declared forms used when rendering entries.

// User attribute types.
pub const ATTR_OBJECTCLASS: &str = "objectClass";
pub const ATTR_ALIASED_OBJECT_NAME: &str = "aliasedObjectName";
pub const ATTR_CN: &str = "cn";
pub const ATTR_SN: &str = "sn";
pub const ATTR_C: &str = "c";
pub const ATTR_L: &str = "l";
pub const ATTR_ST: &str = "st";
pub const ATTR_STREET: &str = "street";
pub const ATTR_O: &str = "o";
pub const ATTR_OU: &str = "ou";
pub const ATTR_TITLE: &str = "title";
pub const ATTR_DESCRIPTION: &str = "description";
pub const ATTR_POSTAL_CODE: &str = "postalCode";
pub const ATTR_TELEPHONE_NUMBER: &str = "telephoneNumber";
pub const ATTR_MEMBER: &str = "member";
pub const ATTR_OWNER: &str = "owner";
pub const ATTR_SEE_ALSO: &str = "seeAlso";
pub const ATTR_USER_PASSWORD: &str = "userPassword";
pub const ATTR_GIVEN_NAME: &str = "givenName";
pub const ATTR_UNIQUE_MEMBER: &str = "uniqueMember";
pub const ATTR_DISPLAY_NAME: &str = "displayName";
pub const ATTR_UID: &str = "uid";
pub const ATTR_MAIL: &str = "mail";
pub const ATTR_DC: &str = "dc";
pub const ATTR_REF: &str = "ref";
pub const ATTR_EMPLOYEE_NUMBER: &str = "employeeNumber";
pub const ATTR_JPEG_PHOTO: &str = "jpegPhoto";

// Operational attribute types.
pub const ATTR_CREATE_TIMESTAMP: &str = "createTimestamp";
pub const ATTR_MODIFY_TIMESTAMP: &str = "modifyTimestamp";
pub const ATTR_CREATORS_NAME: &str = "creatorsName";
pub const ATTR_MODIFIERS_NAME: &str = "modifiersName";
pub const ATTR_ADMINISTRATIVE_ROLE: &str = "administrativeRole";
pub const ATTR_SUBTREE_SPECIFICATION: &str = "subtreeSpecification";
pub const ATTR_COLLECTIVE_EXCLUSIONS: &str = "collectiveExclusions";
pub const ATTR_SUBSCHEMA_SUBENTRY: &str = "subschemaSubentry";
pub const ATTR_ACCESS_CONTROL_SUBENTRIES: &str = "accessControlSubentries";
pub const ATTR_COLLECTIVE_ATTRIBUTE_SUBENTRIES: &str = "collectiveAttributeSubentries";
pub const ATTR_ENTRY_UUID: &str = "entryUUID";
pub const ATTR_ENTRY_CSN: &str = "entryCSN";
pub const ATTR_ENTRY_DELETED: &str = "entryDeleted";
pub const ATTR_PRESCRIPTIVE_ACI: &str = "prescriptiveACI";
pub const ATTR_ENTRY_ACI: &str = "entryACI";
pub const ATTR_SUBENTRY_ACI: &str = "subentryACI";
pub const ATTR_NAMING_CONTEXTS: &str = "namingContexts";
pub const ATTR_SUPPORTED_LDAP_VERSION: &str = "supportedLDAPVersion";
pub const ATTR_SUPPORTED_CONTROL: &str = "supportedControl";
pub const ATTR_VENDOR_NAME: &str = "vendorName";
pub const ATTR_VENDOR_VERSION: &str = "vendorVersion";

// Collective attribute types.
pub const ATTR_C_L: &str = "c-l";
pub const ATTR_C_ST: &str = "c-st";
pub const ATTR_C_STREET: &str = "c-street";
pub const ATTR_C_O: &str = "c-o";
pub const ATTR_C_OU: &str = "c-ou";
pub const ATTR_C_POSTAL_CODE: &str = "c-postalCode";
pub const ATTR_C_TELEPHONE_NUMBER: &str = "c-telephoneNumber";

// Object classes.
pub const CLASS_TOP: &str = "top";
pub const CLASS_ALIAS: &str = "alias";
pub const CLASS_COUNTRY: &str = "country";
pub const CLASS_LOCALITY: &str = "locality";
pub const CLASS_ORGANIZATION: &str = "organization";
pub const CLASS_ORGANIZATIONAL_UNIT: &str = "organizationalUnit";
pub const CLASS_PERSON: &str = "person";
pub const CLASS_ORGANIZATIONAL_PERSON: &str = "organizationalPerson";
pub const CLASS_ORGANIZATIONAL_ROLE: &str = "organizationalRole";
pub const CLASS_GROUP_OF_NAMES: &str = "groupOfNames";
pub const CLASS_GROUP_OF_UNIQUE_NAMES: &str = "groupOfUniqueNames";
pub const CLASS_INET_ORG_PERSON: &str = "inetOrgPerson";
pub const CLASS_DOMAIN: &str = "domain";
pub const CLASS_DC_OBJECT: &str = "dcObject";
pub const CLASS_UID_OBJECT: &str = "uidObject";
pub const CLASS_EXTENSIBLE_OBJECT: &str = "extensibleObject";
pub const CLASS_REFERRAL: &str = "referral";
pub const CLASS_SUBENTRY: &str = "subentry";
pub const CLASS_ACCESS_CONTROL_SUBENTRY: &str = "accessControlSubentry";
pub const CLASS_COLLECTIVE_ATTRIBUTE_SUBENTRY: &str = "collectiveAttributeSubentry";

// Administrative roles, as values of administrativeRole.
pub const ROLE_AUTONOMOUS_AREA: &str = "autonomousArea";
pub const ROLE_ACCESS_CONTROL_SPECIFIC_AREA: &str = "accessControlSpecificArea";
pub const ROLE_ACCESS_CONTROL_INNER_AREA: &str = "accessControlInnerArea";
pub const ROLE_COLLECTIVE_ATTRIBUTE_SPECIFIC_AREA: &str = "collectiveAttributeSpecificArea";
pub const ROLE_COLLECTIVE_ATTRIBUTE_INNER_AREA: &str = "collectiveAttributeInnerArea";

/// The value of collectiveExclusions that removes every collective attribute.
pub const EXCLUDE_ALL_COLLECTIVE_ATTRIBUTES: &str = "excludeAllCollectiveAttributes";

// System DNs.
pub const DN_SYSTEM: &str = "ou=system";
pub const DN_ADMIN: &str = "uid=admin,ou=system";
pub const DN_USERS: &str = "ou=users,ou=system";
pub const DN_GROUPS: &str = "ou=groups,ou=system";
pub const DN_CONFIGURATION: &str = "ou=configuration,ou=system";
pub const DN_ADMINISTRATORS: &str = "cn=Administrators,ou=groups,ou=system";
pub const DN_SUBSCHEMA: &str = "cn=schema";

pub const SYSTEM_PARTITION_ID: &str = "system";

pub const VENDOR_NAME: &str = "dirsrv project";
pub const LDAP_VERSION: &str = "3";

/// The manageDsaIT control.
pub const CONTROL_MANAGE_DSA_IT: &str = "2.16.840.1.113730.3.4.2";

// Attribute selections in search requests.
pub const SELECT_ALL_USER: &str = "*";
pub const SELECT_ALL_OPERATIONAL: &str = "+";
pub const SELECT_NO_ATTRIBUTES: &str = "1.1";
