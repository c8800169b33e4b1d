//! Subentries and the administrative areas they govern.
//!
//! A subentry sits directly below an administrative point (an entry holding
//! `administrativeRole`) and selects part of the area with its subtree specification.
//! Every entry the subtree selects carries the subentry's name in
//! `accessControlSubentries` or `collectiveAttributeSubentries`. The names are stamped
//! on add and recomputed whenever a subentry changes or an entry moves.
//!
//! The [`SubentryCache`] holds the resolved subtree of every stored subentry. It is a
//! partition listener, so it follows committed changes without lookups of its own.

use std::collections::BTreeMap;

use concread::cowcell::CowCell;

use crate::be::search::EntryFilteringCursor;
use crate::be::{PartitionChange, PartitionListener};
use crate::event::SearchScope;
use crate::interceptors::{Interceptor, NextInterceptor};
use crate::prelude::*;
use crate::server::access::aci::parse_aci;
use crate::server::access::tuple::AciTuple;
use crate::server::ServiceCore;
use crate::subtree::{ResolvedSubtree, SubtreeSpecification};

/// A stored subentry with its subtree anchored at the administrative point.
#[derive(Debug)]
pub struct SubentryRecord {
    pub dn: Dn,
    pub subtree: ResolvedSubtree,
    pub access_control: bool,
    pub collective: bool,
    /// Parsed from `prescriptiveACI`.
    pub tuples: Arc<Vec<AciTuple>>,
    entry: Arc<EntrySealedCommitted>,
}

/// Resolve the subtree and prescriptive ACI of a subentry. Fails if either is invalid.
fn resolve_parts<STATE, S: SchemaTransaction + ?Sized>(
    entry: &Entry<STATE>,
    schema: &S,
) -> Result<(ResolvedSubtree, Vec<AciTuple>), OperationError> {
    let spec = match entry.get_ava_single_str(ATTR_SUBTREE_SPECIFICATION) {
        Some(s) => SubtreeSpecification::parse(s)?,
        None => SubtreeSpecification::default(),
    };
    let admin_point = entry.dn().parent().unwrap_or_else(Dn::root);
    let subtree = spec.resolve(&admin_point, schema)?;
    let mut tuples = Vec::new();
    for raw in entry.get_ava_iter_str(ATTR_PRESCRIPTIVE_ACI) {
        tuples.extend(parse_aci(raw, schema)?);
    }
    Ok((subtree, tuples))
}

impl SubentryRecord {
    fn build<S: SchemaTransaction + ?Sized>(
        entry: Arc<EntrySealedCommitted>,
        schema: &S,
    ) -> Result<Self, OperationError> {
        let (subtree, tuples) = resolve_parts(entry.as_ref(), schema)?;
        Ok(SubentryRecord {
            dn: entry.dn().clone(),
            subtree,
            access_control: entry.has_class(CLASS_ACCESS_CONTROL_SUBENTRY),
            collective: entry.has_class(CLASS_COLLECTIVE_ATTRIBUTE_SUBENTRY),
            tuples: Arc::new(tuples),
            entry,
        })
    }

    /// The subentry as stored.
    pub fn entry(&self) -> &EntrySealedCommitted {
        &self.entry
    }
}

pub struct SubentryCache {
    schema: Schema,
    // Keyed by the normalised name.
    records: CowCell<BTreeMap<String, Arc<SubentryRecord>>>,
}

type Records = BTreeMap<String, Arc<SubentryRecord>>;

impl SubentryCache {
    pub fn new(schema: Schema) -> Self {
        SubentryCache {
            schema,
            records: CowCell::new(BTreeMap::new()),
        }
    }

    fn insert_into(&self, records: &mut Records, entry: Arc<EntrySealedCommitted>) {
        if !entry.is_subentry() {
            return;
        }
        match SubentryRecord::build(entry.clone(), &self.schema.read()) {
            Ok(record) => {
                records.insert(record.dn.to_norm_string(), Arc::new(record));
            }
            Err(e) => {
                admin_error!(dn = %entry.dn(), ?e, "ignoring subentry that can not be resolved");
            }
        }
    }

    /// Replace the cache content with the given subentries.
    pub fn load<'a, I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = &'a Arc<EntrySealedCommitted>>,
    {
        let mut records_wr = self.records.write();
        let records = records_wr.get_mut();
        records.clear();
        for e in entries {
            self.insert_into(records, e.clone());
        }
        let loaded = records.len();
        records_wr.commit();
        loaded
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, dn: &Dn) -> Option<Arc<SubentryRecord>> {
        self.records.read().get(&dn.to_norm_string()).cloned()
    }

    /// The subentries whose subtree selects `entry`. Subentries select no subentry.
    pub fn covering<STATE>(&self, entry: &Entry<STATE>) -> Vec<Arc<SubentryRecord>> {
        if entry.is_subentry() {
            return Vec::new();
        }
        self.records
            .read()
            .values()
            .filter(|r| r.subtree.contains(entry))
            .cloned()
            .collect()
    }
}

impl PartitionListener for SubentryCache {
    fn committed(&self, _partition: &str, change: &PartitionChange<'_>) {
        let mut records_wr = self.records.write();
        let records = records_wr.get_mut();
        match change {
            PartitionChange::Add { entry } => self.insert_into(records, Arc::new((*entry).clone())),
            PartitionChange::Delete { entry } => {
                records.remove(&entry.dn().to_norm_string());
            }
            PartitionChange::Modify { before, after, .. } => {
                records.remove(&before.dn().to_norm_string());
                self.insert_into(records, Arc::new((*after).clone()));
            }
            PartitionChange::Relocate { before, after, .. } => {
                records.remove(&before.dn().to_norm_string());
                self.insert_into(records, Arc::new((*after).clone()));
                // Subentries below the moved entry move with it.
                let moved: Vec<Arc<SubentryRecord>> = records
                    .values()
                    .filter(|r| r.dn.is_descendant_of(before.dn()))
                    .cloned()
                    .collect();
                for record in moved {
                    records.remove(&record.dn.to_norm_string());
                    if let Some(dn) = record.dn.rebase(before.dn(), after.dn()) {
                        let mut e = record.entry().clone();
                        e.set_dn(dn);
                        self.insert_into(records, Arc::new(e));
                    }
                }
            }
        }
        records_wr.commit();
    }
}

pub struct SubentryInterceptor;

/// What a recomputation of subentry references skips. Names are already normalised
/// and the changes are the server's own.
fn restamp_bypass() -> Bypass {
    Bypass::all().difference(Bypass::NORMALIZATION | Bypass::EXCEPTION)
}

/// The references `entry` should carry, access control first.
fn references<STATE>(core: &ServiceCore, entry: &Entry<STATE>) -> Result<(ValueSet, ValueSet), OperationError> {
    let schema = core.schema.read();
    let mut acs = ValueSet::new();
    let mut cas = ValueSet::new();
    for record in core.subentries.covering(entry) {
        let name = record.dn.to_string();
        if record.access_control {
            acs.insert(schema.value_for(ATTR_ACCESS_CONTROL_SUBENTRIES, &name)?.1);
        }
        if record.collective {
            cas.insert(schema.value_for(ATTR_COLLECTIVE_ATTRIBUTE_SUBENTRIES, &name)?.1);
        }
    }
    Ok((acs, cas))
}

/// Bring the references of a stored entry up to date.
fn refresh(core: &ServiceCore, common: &OperationCommon, entry: &EntrySealedCommitted) -> Result<(), OperationError> {
    if entry.is_subentry() {
        return Ok(());
    }
    let (acs, cas) = references(core, entry)?;
    let mut mods = ModifyList::new_valid(Vec::new());
    {
        let schema = core.schema.read();
        for (attr, wanted) in [
            (ATTR_ACCESS_CONTROL_SUBENTRIES, acs),
            (ATTR_COLLECTIVE_ATTRIBUTE_SUBENTRIES, cas),
        ] {
            let current = entry.get_ava_set(attr).cloned().unwrap_or_default();
            if current == wanted {
                continue;
            }
            let sa = schema
                .resolve_attribute(attr)
                .cloned()
                .ok_or_else(|| SchemaError::InvalidAttribute(attr.to_string()))?;
            mods.push_system(ModifyOp::Replace, sa, wanted.into_iter().collect());
        }
    }
    if mods.is_empty() {
        return Ok(());
    }
    request_trace!(dn = %entry.dn(), "restamping subentry references");
    let mut ctx = ModifyContext::new(common.nested(restamp_bypass()), entry.dn().clone(), mods);
    core.modify(&mut ctx)
}

/// Refresh every entry at or below `base`.
fn refresh_below(core: &ServiceCore, common: &OperationCommon, base: &Dn) -> Result<(), OperationError> {
    let filter = Filter::all(&core.schema.read())?;
    let entries = match core.nexus.scan(base, SearchScope::Subtree, &filter) {
        Ok(entries) => entries,
        // The area itself went away.
        Err(OperationError::NoSuchObject { .. }) => return Ok(()),
        Err(e) => return Err(e),
    };
    for e in entries.iter() {
        refresh(core, common, e)?;
    }
    Ok(())
}

fn admin_point_of(dn: &Dn) -> Dn {
    dn.parent().unwrap_or_else(Dn::root)
}

fn hide_subentries(cursor: &mut EntryFilteringCursor) {
    cursor.add_filter(Box::new(|e: &mut EntrySealedCommitted| Ok(!e.is_subentry())));
}

impl Interceptor for SubentryInterceptor {
    fn id(&self) -> &'static str {
        "subentry"
    }

    fn flag(&self) -> Bypass {
        Bypass::SUBENTRY
    }

    fn init(&self, core: &ServiceCore) -> Result<(), OperationError> {
        let filter = Filter::new(f_eq(ATTR_OBJECTCLASS, CLASS_SUBENTRY)).validate(&core.schema.read())?;
        let found = core.nexus.scan(&Dn::root(), SearchScope::Subtree, &filter)?;
        let loaded = core.subentries.load(found.iter());
        admin_info!(subentries = loaded, "subentry cache loaded");
        Ok(())
    }

    #[instrument(level = "debug", name = "subentry::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        let core = next.core();
        if ctx.entry.is_subentry() {
            let admin_point = admin_point_of(&ctx.dn);
            let is_admin_point = !admin_point.is_root()
                && core
                    .nexus
                    .lookup_dn(&admin_point)?
                    .attribute_pres(ATTR_ADMINISTRATIVE_ROLE);
            if !is_admin_point {
                request_info!(dn = %ctx.dn, "subentry outside of an administrative point");
                return Err(OperationError::NamingViolation(format!(
                    "{} is not an administrative point",
                    admin_point
                )));
            }
            resolve_parts(&ctx.entry, &core.schema.read())?;

            next.add(ctx)?;
            return refresh_below(core, &ctx.common, &admin_point);
        }

        let (acs, cas) = references(core, &ctx.entry)?;
        {
            let schema = core.schema.read();
            for (attr, values) in [
                (ATTR_ACCESS_CONTROL_SUBENTRIES, acs),
                (ATTR_COLLECTIVE_ATTRIBUTE_SUBENTRIES, cas),
            ] {
                if values.is_empty() {
                    continue;
                }
                let sa = schema
                    .resolve_attribute(attr)
                    .cloned()
                    .ok_or_else(|| SchemaError::InvalidAttribute(attr.to_string()))?;
                ctx.entry.set_ava(sa, values);
            }
        }
        next.add(ctx)
    }

    #[instrument(level = "debug", name = "subentry::delete", skip_all)]
    fn delete(&self, next: &NextInterceptor<'_>, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        let core = next.core();
        let was_subentry = core.subentries.get(&ctx.dn).is_some();
        next.delete(ctx)?;
        if was_subentry {
            refresh_below(core, &ctx.common, &admin_point_of(&ctx.dn))?;
        }
        Ok(())
    }

    #[instrument(level = "debug", name = "subentry::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        let core = next.core();
        let original = match &ctx.original {
            Some(e) => e.clone(),
            None => core.nexus.lookup_dn(&ctx.dn)?,
        };
        if original.is_subentry() {
            let mut after = original.clone_new();
            after.apply_modlist(&ctx.mods)?;
            resolve_parts(&after, &core.schema.read())?;
            next.modify(ctx)?;
            return refresh_below(core, &ctx.common, &admin_point_of(&ctx.dn));
        }

        next.modify(ctx)?;
        // A changed object class can change what a refinement selects.
        let oc_changed = core
            .schema
            .read()
            .resolve_attribute(ATTR_OBJECTCLASS)
            .map(|sa| ctx.mods.touches(&sa.oid))
            .unwrap_or(false);
        if oc_changed {
            if let Some(altered) = ctx.altered.clone() {
                refresh(core, &ctx.common, &altered)?;
            }
        }
        Ok(())
    }

    #[instrument(level = "debug", name = "subentry::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        let core = next.core();
        next.rename(ctx)?;
        let new_dn = ctx.new_dn();
        refresh_below(core, &ctx.common, &admin_point_of(&new_dn))
    }

    #[instrument(level = "debug", name = "subentry::move", skip_all)]
    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        let core = next.core();
        check_subentry_target(core, &ctx.dn, &ctx.new_superior)?;
        next.move_entry(ctx)?;
        relocated(core, &ctx.common, &ctx.dn, &ctx.new_dn())
    }

    #[instrument(level = "debug", name = "subentry::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        let core = next.core();
        check_subentry_target(core, &ctx.dn, &ctx.new_superior)?;
        next.move_and_rename(ctx)?;
        relocated(core, &ctx.common, &ctx.dn, &ctx.new_dn())
    }

    #[instrument(level = "debug", name = "subentry::list", skip_all)]
    fn list(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut ListContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        let mut cursor = next.list(ctx)?;
        hide_subentries(&mut cursor);
        Ok(cursor)
    }

    #[instrument(level = "debug", name = "subentry::search", skip_all)]
    fn search(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut SearchContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        let visible = ctx.scope == SearchScope::Base || ctx.filter.valid()?.is_subentry_filter();
        let mut cursor = next.search(ctx)?;
        if !visible {
            hide_subentries(&mut cursor);
        }
        Ok(cursor)
    }
}

/// A subentry may only be moved below another administrative point.
fn check_subentry_target(core: &ServiceCore, dn: &Dn, new_superior: &Dn) -> Result<(), OperationError> {
    if core.subentries.get(dn).is_none() {
        return Ok(());
    }
    if !core.nexus.lookup_dn(new_superior)?.attribute_pres(ATTR_ADMINISTRATIVE_ROLE) {
        return Err(OperationError::NamingViolation(format!(
            "{} is not an administrative point",
            new_superior
        )));
    }
    Ok(())
}

/// After a move, both the area left and the area entered are recomputed. The moved
/// entry is inside the latter.
fn relocated(core: &ServiceCore, common: &OperationCommon, old_dn: &Dn, new_dn: &Dn) -> Result<(), OperationError> {
    if core.subentries.get(new_dn).is_some() {
        refresh_below(core, common, &admin_point_of(old_dn))?;
        return refresh_below(core, common, &admin_point_of(new_dn));
    }
    refresh_below(core, common, new_dn)
}

#[cfg(test)]
mod tests {
    use crate::event::{SearchRequest, SearchScope};
    use crate::prelude::*;

    fn area(ds: &DirectoryService) {
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
                "ou=people,ou=area,ou=system",
                (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
                (ATTR_OU, "people")
            ))
            .unwrap();
        admin
            .add(entry_init!(
                "cn=before,ou=people,ou=area,ou=system",
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, "before"),
                (ATTR_SN, "B")
            ))
            .unwrap();
    }

    fn subentry(dn: &str, spec: &str) -> EntryInit {
        entry_init!(
            dn,
            (ATTR_OBJECTCLASS, CLASS_SUBENTRY),
            (ATTR_OBJECTCLASS, CLASS_COLLECTIVE_ATTRIBUTE_SUBENTRY),
            (ATTR_CN, "people"),
            (ATTR_SUBTREE_SPECIFICATION, spec),
            (ATTR_C_OU, "engineering")
        )
    }

    fn references(ds: &DirectoryService, dn: &str) -> Vec<String> {
        ds.admin_session()
            .lookup(dn, &[ATTR_COLLECTIVE_ATTRIBUTE_SUBENTRIES])
            .unwrap()
            .get_ava_iter_str(ATTR_COLLECTIVE_ATTRIBUTE_SUBENTRIES)
            .map(str::to_string)
            .collect()
    }

    #[ds_test]
    fn test_subentry_requires_administrative_point(ds: &DirectoryService) {
        let r = ds
            .admin_session()
            .add(subentry("cn=people,ou=system", r#"{"base": ""}"#));
        assert!(matches!(r, Err(OperationError::NamingViolation(_))));
    }

    #[ds_test]
    fn test_subentry_stamps_existing_and_new_entries(ds: &DirectoryService) {
        area(ds);
        let admin = ds.admin_session();
        admin
            .add(subentry("cn=people,ou=area,ou=system", r#"{"base": "ou=people"}"#))
            .unwrap();
        assert_eq!(
            references(ds, "cn=before,ou=people,ou=area,ou=system").len(),
            1
        );
        // The administrative point is outside the subtree.
        assert!(references(ds, "ou=area,ou=system").is_empty());

        admin
            .add(entry_init!(
                "cn=after,ou=people,ou=area,ou=system",
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, "after"),
                (ATTR_SN, "A")
            ))
            .unwrap();
        assert_eq!(references(ds, "cn=after,ou=people,ou=area,ou=system").len(), 1);

        admin.delete("cn=people,ou=area,ou=system").unwrap();
        assert!(references(ds, "cn=after,ou=people,ou=area,ou=system").is_empty());
    }

    #[ds_test]
    fn test_subentry_reference_follows_moves(ds: &DirectoryService) {
        area(ds);
        let admin = ds.admin_session();
        admin
            .add(subentry("cn=people,ou=area,ou=system", r#"{"base": "ou=people"}"#))
            .unwrap();
        admin
            .move_entry("cn=before,ou=people,ou=area,ou=system", "ou=area,ou=system")
            .unwrap();
        assert!(references(ds, "cn=before,ou=area,ou=system").is_empty());
        admin
            .move_entry("cn=before,ou=area,ou=system", "ou=people,ou=area,ou=system")
            .unwrap();
        assert_eq!(references(ds, "cn=before,ou=people,ou=area,ou=system").len(), 1);
    }

    #[ds_test]
    fn test_subentries_hidden_from_searches(ds: &DirectoryService) {
        area(ds);
        let admin = ds.admin_session();
        admin
            .add(subentry("cn=people,ou=area,ou=system", r#"{"base": "ou=people"}"#))
            .unwrap();
        let all = admin
            .search(SearchRequest::new(
                "ou=area,ou=system",
                SearchScope::Subtree,
                "(objectClass=*)",
            ))
            .unwrap();
        assert_eq!(all.len(), 3);
        let subs = admin
            .search(SearchRequest::new(
                "ou=area,ou=system",
                SearchScope::Subtree,
                "(objectClass=subentry)",
            ))
            .unwrap();
        assert_eq!(subs.len(), 1);
        assert!(admin
            .lookup("cn=people,ou=area,ou=system", &[SELECT_ALL_USER])
            .is_ok());
    }

    #[ds_test]
    fn test_invalid_subtree_specification_refused(ds: &DirectoryService) {
        area(ds);
        let r = ds
            .admin_session()
            .add(subentry("cn=people,ou=area,ou=system", r#"{"bogus": 1}"#));
        assert!(matches!(r, Err(OperationError::InvalidSubtreeSpecification(_))));
    }
}
