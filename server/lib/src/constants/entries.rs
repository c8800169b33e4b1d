//! The entries every service bootstraps into the system partition.

use crate::entry::EntryInit;
use crate::ldif::{parse_ldif, LdifRecord};
use crate::prelude::*;

/// The system partition content. The administrator password is not part of it, it is
/// taken from the configuration when the partition is first loaded.
pub const SYSTEM_ENTRIES_LDIF: &str = r#"version: 1

dn: ou=system
objectClass: top
objectClass: organizationalUnit
ou: system
description: The system context entry

dn: uid=admin,ou=system
objectClass: top
objectClass: person
objectClass: organizationalPerson
objectClass: inetOrgPerson
uid: admin
cn: system administrator
sn: administrator
displayName: Directory Superuser

dn: ou=users,ou=system
objectClass: top
objectClass: organizationalUnit
ou: users

dn: ou=groups,ou=system
objectClass: top
objectClass: organizationalUnit
ou: groups

dn: cn=Administrators,ou=groups,ou=system
objectClass: top
objectClass: groupOfNames
cn: Administrators
member: uid=admin,ou=system

dn: ou=configuration,ou=system
objectClass: top
objectClass: organizationalUnit
ou: configuration
"#;

/// The bootstrap entries of the system partition, parents first.
pub fn system_entries(admin_password: &str) -> Result<Vec<EntryInit>, OperationError> {
    parse_ldif(SYSTEM_ENTRIES_LDIF)?
        .into_iter()
        .map(|rec| match rec {
            LdifRecord::Content(mut ei) | LdifRecord::Add(mut ei) => {
                if ei.dn().eq_ignore_ascii_case(DN_ADMIN) {
                    ei.add_ava(ATTR_USER_PASSWORD, admin_password.as_bytes());
                }
                Ok(ei)
            }
            other => {
                admin_error!(dn = %other.dn(), "bootstrap ldif holds a change record");
                Err(OperationError::InvalidState)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::system_entries;
    use crate::prelude::*;

    #[test]
    fn test_system_entries_conform_to_schema() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();
        let entries = system_entries("secret").unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[0].dn(), DN_SYSTEM);
        for ei in entries {
            let e = ei.into_entry(&schema_ro).unwrap();
            assert!(e.rdn_values_present());
            assert_eq!(e.schema_check(&schema_ro), Ok(()));
        }
    }
}
