//! The root DSE, the entry with the empty name describing the server itself. It is
//! synthesised from the partitions the nexus holds rather than stored.

use crate::prelude::*;

/// Supported controls advertised to clients.
const SUPPORTED_CONTROLS: &[&str] = &[CONTROL_MANAGE_DSA_IT];

pub(crate) fn build_root_dse<'a, S, I>(schema: &S, suffixes: I) -> Result<EntrySealedCommitted, OperationError>
where
    S: SchemaTransaction + ?Sized,
    I: IntoIterator<Item = &'a Dn>,
{
    let mut ei = entry_init!(
        "",
        (ATTR_OBJECTCLASS, CLASS_TOP),
        (ATTR_OBJECTCLASS, CLASS_EXTENSIBLE_OBJECT),
        (ATTR_SUPPORTED_LDAP_VERSION, LDAP_VERSION),
        (ATTR_VENDOR_NAME, VENDOR_NAME),
        (ATTR_VENDOR_VERSION, env!("CARGO_PKG_VERSION")),
        (ATTR_SUBSCHEMA_SUBENTRY, DN_SUBSCHEMA)
    );
    for suffix in suffixes {
        ei.add_ava(ATTR_NAMING_CONTEXTS, suffix.to_string());
    }
    for control in SUPPORTED_CONTROLS {
        ei.add_ava(ATTR_SUPPORTED_CONTROL, *control);
    }
    Ok(ei.into_entry(schema)?.into_committed(0))
}

#[cfg(test)]
mod tests {
    use crate::event::{SearchRequest, SearchScope};
    use crate::prelude::*;

    #[ds_test]
    fn test_root_dse_lookup(ds: &DirectoryService) {
        let admin = ds.admin_session();
        let dse = admin
            .lookup("", &[ATTR_NAMING_CONTEXTS, ATTR_SUPPORTED_LDAP_VERSION, ATTR_VENDOR_NAME])
            .unwrap();
        assert!(dse.dn().is_root());
        let mut contexts: Vec<&str> = dse.get_ava_iter_str(ATTR_NAMING_CONTEXTS).collect();
        contexts.sort_unstable();
        assert_eq!(contexts, vec!["dc=example,dc=com", "ou=system"]);
        assert_eq!(dse.get_ava_single_str(ATTR_SUPPORTED_LDAP_VERSION), Some(LDAP_VERSION));
        assert_eq!(dse.get_ava_single_str(ATTR_VENDOR_NAME), Some(VENDOR_NAME));
    }

    #[ds_test(allow_anonymous_access = false)]
    fn test_root_dse_readable_anonymously(ds: &DirectoryService) {
        let anon = ds.anonymous_session();
        let found = anon
            .search(
                SearchRequest::new("", SearchScope::Base, "(objectClass=*)")
                    .attrs(&[ATTR_SUBSCHEMA_SUBENTRY]),
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_ava_single_str(ATTR_SUBSCHEMA_SUBENTRY), Some(DN_SUBSCHEMA));
        // Nothing else is.
        assert!(matches!(
            anon.lookup(DN_SYSTEM, &[SELECT_ALL_USER]),
            Err(OperationError::InsufficientAccessRights)
        ));
    }
}
