//! Collective attributes (RFC 3671). The values live in collective attribute
//! subentries and are shared by every entry the subentry selects. They are never
//! stored on those entries, instead they are merged into entries as they are read.

use std::collections::BTreeSet;

use crate::be::search::EntryFilteringCursor;
use crate::interceptors::subentry::SubentryCache;
use crate::interceptors::{Interceptor, NextInterceptor};
use crate::prelude::*;

pub struct CollectiveAttributeInterceptor;

/// What `collectiveExclusions` removes from an entry.
enum Exclusions {
    All,
    Some(BTreeSet<AttrString>),
}

impl Exclusions {
    fn of<S: SchemaTransaction + ?Sized>(entry: &EntrySealedCommitted, schema: &S) -> Self {
        let mut excluded = BTreeSet::new();
        for name in entry.get_ava_iter_str(ATTR_COLLECTIVE_EXCLUSIONS) {
            let name = name.trim();
            if name.eq_ignore_ascii_case(EXCLUDE_ALL_COLLECTIVE_ATTRIBUTES)
                || name == OID_EXCLUDE_ALL_COLLECTIVE_ATTRIBUTES
            {
                return Exclusions::All;
            }
            match schema.resolve_attribute(name) {
                Some(sa) => {
                    excluded.insert(sa.oid.clone());
                }
                None => {
                    request_warn!(dn = %entry.dn(), attr = %name, "unknown collective exclusion");
                }
            }
        }
        Exclusions::Some(excluded)
    }

    fn excludes(&self, oid: &str) -> bool {
        match self {
            Exclusions::All => true,
            Exclusions::Some(s) => s.contains(oid),
        }
    }
}

/// Merge the collective attributes of every subentry selecting `entry` into it.
fn inject<S: SchemaTransaction + ?Sized>(
    subentries: &SubentryCache,
    schema: &S,
    entry: &mut EntrySealedCommitted,
) {
    if entry.dn().is_root() || entry.is_subentry() {
        return;
    }
    let exclusions = Exclusions::of(entry, schema);
    if matches!(exclusions, Exclusions::All) {
        return;
    }
    for record in subentries.covering(entry).into_iter().filter(|r| r.collective) {
        for attr in record.entry().attrs().filter(|a| a.schema().collective) {
            if exclusions.excludes(attr.oid()) {
                continue;
            }
            for v in attr.values().iter() {
                entry.add_ava(attr.schema().clone(), v.clone());
            }
        }
    }
}

impl Interceptor for CollectiveAttributeInterceptor {
    fn id(&self) -> &'static str {
        "collective"
    }

    fn flag(&self) -> Bypass {
        Bypass::COLLECTIVE
    }

    #[instrument(level = "debug", name = "collective::lookup", skip_all)]
    fn lookup(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut LookupContext,
    ) -> Result<EntrySealedCommitted, OperationError> {
        let mut entry = next.lookup(ctx)?;
        let core = next.core();
        inject(&core.subentries, &core.schema.read(), &mut entry);
        Ok(entry)
    }

    #[instrument(level = "debug", name = "collective::list", skip_all)]
    fn list(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut ListContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        let mut cursor = next.list(ctx)?;
        add_inject_filter(next, &mut cursor);
        Ok(cursor)
    }

    #[instrument(level = "debug", name = "collective::search", skip_all)]
    fn search(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut SearchContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        let mut cursor = next.search(ctx)?;
        add_inject_filter(next, &mut cursor);
        Ok(cursor)
    }
}

fn add_inject_filter(next: &NextInterceptor<'_>, cursor: &mut EntryFilteringCursor) {
    let core = next.core();
    let subentries = core.subentries.clone();
    let schema = core.schema.clone();
    cursor.add_filter(Box::new(move |e: &mut EntrySealedCommitted| {
        inject(&subentries, &schema.read(), e);
        Ok(true)
    }));
}

#[cfg(test)]
mod tests {
    use crate::event::{SearchRequest, SearchScope};
    use crate::prelude::*;

    fn setup(ds: &DirectoryService) {
        let admin = ds.admin_session();
        admin
            .add(entry_init!(
                "ou=area,ou=system",
                (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
                (ATTR_OU, "area"),
                (ATTR_ADMINISTRATIVE_ROLE, ROLE_COLLECTIVE_ATTRIBUTE_SPECIFIC_AREA)
            ))
            .unwrap();
        admin
            .add(entry_init!(
                "cn=collective,ou=area,ou=system",
                (ATTR_OBJECTCLASS, CLASS_SUBENTRY),
                (ATTR_OBJECTCLASS, CLASS_COLLECTIVE_ATTRIBUTE_SUBENTRY),
                (ATTR_CN, "collective"),
                (ATTR_SUBTREE_SPECIFICATION, "{}"),
                (ATTR_C_OU, "engineering"),
                (ATTR_C_L, "Brisbane")
            ))
            .unwrap();
        for (cn, exclusion) in [("plain", None), ("nol", Some(ATTR_C_L)), ("none", Some(EXCLUDE_ALL_COLLECTIVE_ATTRIBUTES))] {
            let mut ei = entry_init!(
                &format!("cn={},ou=area,ou=system", cn),
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, cn),
                (ATTR_SN, "S")
            );
            if let Some(x) = exclusion {
                ei.add_ava(ATTR_COLLECTIVE_EXCLUSIONS, x);
            }
            admin.add(ei).unwrap();
        }
    }

    #[ds_test]
    fn test_collective_values_injected_on_lookup(ds: &DirectoryService) {
        setup(ds);
        let admin = ds.admin_session();
        let e = admin
            .lookup("cn=plain,ou=area,ou=system", &[SELECT_ALL_USER])
            .unwrap();
        assert_eq!(e.get_ava_single_str(ATTR_C_OU), Some("engineering"));
        assert_eq!(e.get_ava_single_str(ATTR_C_L), Some("Brisbane"));

        let e = admin
            .lookup("cn=nol,ou=area,ou=system", &[SELECT_ALL_USER])
            .unwrap();
        assert_eq!(e.get_ava_single_str(ATTR_C_OU), Some("engineering"));
        assert!(!e.attribute_pres(ATTR_C_L));

        let e = admin
            .lookup("cn=none,ou=area,ou=system", &[SELECT_ALL_USER])
            .unwrap();
        assert!(!e.attribute_pres(ATTR_C_OU));
    }

    #[ds_test]
    fn test_collective_values_not_stored(ds: &DirectoryService) {
        setup(ds);
        let admin = ds.admin_session();
        // Not indexed on the entry, so the stored form never matches.
        let found = admin
            .search(SearchRequest::new(
                "ou=area,ou=system",
                SearchScope::Subtree,
                "(c-ou=engineering)",
            ))
            .unwrap();
        assert!(found.is_empty());
        let found = admin
            .search(
                SearchRequest::new("ou=area,ou=system", SearchScope::OneLevel, "(cn=plain)")
                    .attrs(&[ATTR_C_OU]),
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_ava_single_str(ATTR_C_OU), Some("engineering"));
    }

    #[ds_test]
    fn test_collective_attribute_refused_on_regular_entry(ds: &DirectoryService) {
        let r = ds.admin_session().add(entry_init!(
            "cn=direct,ou=system",
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_CN, "direct"),
            (ATTR_SN, "D"),
            (ATTR_C_OU, "x")
        ));
        assert!(matches!(
            r,
            Err(OperationError::SchemaViolation(SchemaError::CollectiveOnRegularEntry(_)))
        ));
    }
}
