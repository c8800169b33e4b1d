//! Enforces X.501 basic access control. Each operation is turned into one or more
//! access requests (an entry, an attribute or a value together with the micro
//! operations it needs) and every request must be granted by the decision function.
//!
//! Reads are filtered rather than refused: a lookup or search result loses whatever
//! the user may not read, and search results the user may not browse are dropped.

use crate::be::search::EntryFilteringCursor;
use crate::interceptors::{lookup_for_access, Interceptor, NextInterceptor};
use crate::modify::{ModOrigin, ModifyOp};
use crate::prelude::*;
use crate::server::access::filters::{AccessRequest, UserContext};
use crate::server::access::tuple::{AciTuple, MicroOperation};
use crate::server::ServiceCore;

pub struct AciAuthorizationInterceptor;

const ADD: &[MicroOperation] = &[MicroOperation::Add];
const REMOVE: &[MicroOperation] = &[MicroOperation::Remove];
const MODIFY: &[MicroOperation] = &[MicroOperation::Modify];
const RENAME: &[MicroOperation] = &[MicroOperation::Rename];
const EXPORT: &[MicroOperation] = &[MicroOperation::Export];
const IMPORT: &[MicroOperation] = &[MicroOperation::Import];
const BROWSE: &[MicroOperation] = &[MicroOperation::Browse];
const COMPARE: &[MicroOperation] = &[MicroOperation::Compare];
const DISCLOSE: &[MicroOperation] = &[MicroOperation::DiscloseOnError];

/// Operations the access controls do not apply to.
fn exempt(core: &ServiceCore, common: &OperationCommon) -> bool {
    !core.access.is_enabled() || common.ident.is_internal() || common.ident.is_admin()
}

/// The tuples that govern `entry`. A subentry is governed by the `subentryACI` of
/// its administrative point, so that is fetched as well.
fn tuples_for<STATE>(
    next: &NextInterceptor<'_>,
    common: &OperationCommon,
    entry: &Entry<STATE>,
) -> Vec<AciTuple> {
    let core = next.core();
    let admin_point = if entry.is_subentry() {
        entry
            .dn()
            .parent()
            .and_then(|p| lookup_for_access(next, common, &p).ok())
    } else {
        None
    };
    core.access
        .entry_tuples(entry, admin_point.as_deref(), &core.subentries)
}

/// The error for a refused operation on an existing entry. Unless the user may learn
/// that the entry exists, it is reported as missing.
fn refused<STATE>(
    core: &ServiceCore,
    user: &UserContext,
    tuples: &[AciTuple],
    entry: &Entry<STATE>,
) -> OperationError {
    if core
        .access
        .has_permission(tuples, &AccessRequest::entry(user, entry, DISCLOSE))
    {
        OperationError::InsufficientAccessRights
    } else {
        OperationError::no_such_object(None)
    }
}

fn require<STATE>(
    core: &ServiceCore,
    tuples: &[AciTuple],
    req: &AccessRequest<'_, STATE>,
) -> Result<(), OperationError> {
    if core.access.has_permission(tuples, req) {
        Ok(())
    } else {
        Err(OperationError::InsufficientAccessRights)
    }
}

/// Every attribute and value of the entry must be addable.
fn require_all_values<STATE>(
    core: &ServiceCore,
    user: &UserContext,
    tuples: &[AciTuple],
    entry: &Entry<STATE>,
) -> Result<(), OperationError> {
    for attr in entry.attrs() {
        let sa = attr.schema();
        require(core, tuples, &AccessRequest::attribute(user, entry, sa, None, ADD))?;
        for v in attr.values().iter() {
            require(core, tuples, &AccessRequest::attribute(user, entry, sa, Some(v), ADD))?;
        }
    }
    Ok(())
}

fn original(
    next: &NextInterceptor<'_>,
    common: &OperationCommon,
    dn: &Dn,
    cached: &mut Option<Arc<EntrySealedCommitted>>,
) -> Result<Arc<EntrySealedCommitted>, OperationError> {
    if let Some(e) = cached.as_ref() {
        return Ok(e.clone());
    }
    let e = lookup_for_access(next, common, dn)?;
    *cached = Some(e.clone());
    Ok(e)
}

/// Checks shared by the three relocating operations. `renamed` asks for the Rename
/// permission, `moved_to` for Export here and Import at the new name.
fn check_relocate(
    next: &NextInterceptor<'_>,
    common: &OperationCommon,
    entry: &EntrySealedCommitted,
    renamed: bool,
    moved_to: Option<&Dn>,
) -> Result<(), OperationError> {
    let core = next.core();
    let user = core.access.user_context(&common.ident);
    let tuples = tuples_for(next, common, entry);
    let ops: &[MicroOperation] = if moved_to.is_some() { EXPORT } else { RENAME };
    if !core
        .access
        .has_permission(&tuples, &AccessRequest::entry(&user, entry, ops))
    {
        return Err(refused(core, &user, &tuples, entry));
    }
    if renamed && moved_to.is_some() {
        require(core, &tuples, &AccessRequest::entry(&user, entry, RENAME))?;
    }
    if let Some(new_dn) = moved_to {
        let mut relocated = entry.clone_new();
        relocated.set_dn(new_dn.clone());
        let tuples = tuples_for(next, common, &relocated);
        require(core, &tuples, &AccessRequest::entry(&user, &relocated, IMPORT))?;
    }
    Ok(())
}

impl Interceptor for AciAuthorizationInterceptor {
    fn id(&self) -> &'static str {
        "aci"
    }

    fn flag(&self) -> Bypass {
        Bypass::ACI
    }

    fn init(&self, core: &ServiceCore) -> Result<(), OperationError> {
        admin_info!(enabled = core.access.is_enabled(), "access control");
        Ok(())
    }

    #[instrument(level = "debug", name = "aci::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        let core = next.core();
        core.access.validate_aci_values(&ctx.entry)?;
        if exempt(core, &ctx.common) {
            return next.add(ctx);
        }
        let user = core.access.user_context(&ctx.common.ident);
        let imm_sub_count = match ctx.dn.parent() {
            Some(p) if !p.is_root() => core.nexus.count_children(&p).unwrap_or(0),
            _ => 0,
        };
        let tuples = tuples_for(next, &ctx.common, &ctx.entry);
        if !core.access.has_permission(
            &tuples,
            &AccessRequest::entry(&user, &ctx.entry, ADD).with_imm_sub_count(imm_sub_count),
        ) {
            security_access!(dn = %ctx.dn, "add refused");
            return Err(OperationError::InsufficientAccessRights);
        }
        require_all_values(core, &user, &tuples, &ctx.entry)?;
        next.add(ctx)
    }

    #[instrument(level = "debug", name = "aci::delete", skip_all)]
    fn delete(&self, next: &NextInterceptor<'_>, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        let core = next.core();
        if exempt(core, &ctx.common) {
            return next.delete(ctx);
        }
        let entry = original(next, &ctx.common, &ctx.dn, &mut ctx.original)?;
        let user = core.access.user_context(&ctx.common.ident);
        let tuples = tuples_for(next, &ctx.common, entry.as_ref());
        if !core
            .access
            .has_permission(&tuples, &AccessRequest::entry(&user, entry.as_ref(), REMOVE))
        {
            security_access!(dn = %ctx.dn, "delete refused");
            return Err(refused(core, &user, &tuples, entry.as_ref()));
        }
        next.delete(ctx)
    }

    #[instrument(level = "debug", name = "aci::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        let core = next.core();
        let entry = original(next, &ctx.common, &ctx.dn, &mut ctx.original)?;
        let mut after = entry.clone_new();
        after.apply_modlist(&ctx.mods)?;
        core.access.validate_aci_values(&after)?;
        if exempt(core, &ctx.common) {
            return next.modify(ctx);
        }

        let user = core.access.user_context(&ctx.common.ident);
        let tuples = tuples_for(next, &ctx.common, entry.as_ref());
        if !core
            .access
            .has_permission(&tuples, &AccessRequest::entry(&user, entry.as_ref(), MODIFY))
        {
            security_access!(dn = %ctx.dn, "modify refused");
            return Err(refused(core, &user, &tuples, entry.as_ref()));
        }
        // Additions are judged against the entry as it will be, removals against the
        // entry as it is.
        let after_tuples = tuples_for(next, &ctx.common, &after);
        for m in ctx.mods.iter().filter(|m| m.origin == ModOrigin::User) {
            let sa = m.attr.as_ref();
            let removing = |v: Option<&Value>| {
                require(
                    core,
                    &tuples,
                    &AccessRequest::attribute(&user, entry.as_ref(), sa, v, REMOVE),
                )
            };
            let adding = |v: &Value| {
                require(
                    core,
                    &after_tuples,
                    &AccessRequest::attribute(&user, &after, sa, Some(v), ADD),
                )
            };
            match m.op {
                ModifyOp::Add => {
                    for v in m.values.iter() {
                        adding(v)?;
                    }
                }
                ModifyOp::Remove if m.values.is_empty() => {
                    removing(None)?;
                    for v in entry.get_ava_set(&sa.oid).into_iter().flat_map(|vs| vs.iter()) {
                        removing(Some(v))?;
                    }
                }
                ModifyOp::Remove => {
                    for v in m.values.iter() {
                        removing(Some(v))?;
                    }
                }
                ModifyOp::Replace => {
                    for v in entry.get_ava_set(&sa.oid).into_iter().flat_map(|vs| vs.iter()) {
                        if !m.values.contains(v) {
                            removing(Some(v))?;
                        }
                    }
                    for v in m.values.iter() {
                        adding(v)?;
                    }
                }
            }
        }
        next.modify(ctx)
    }

    #[instrument(level = "debug", name = "aci::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        if !exempt(next.core(), &ctx.common) {
            let entry = original(next, &ctx.common, &ctx.dn, &mut ctx.original)?;
            check_relocate(next, &ctx.common, entry.as_ref(), true, None)?;
        }
        next.rename(ctx)
    }

    #[instrument(level = "debug", name = "aci::move", skip_all)]
    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        if !exempt(next.core(), &ctx.common) {
            let entry = original(next, &ctx.common, &ctx.dn, &mut ctx.original)?;
            let new_dn = ctx.new_dn();
            check_relocate(next, &ctx.common, entry.as_ref(), false, Some(&new_dn))?;
        }
        next.move_entry(ctx)
    }

    #[instrument(level = "debug", name = "aci::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        if !exempt(next.core(), &ctx.common) {
            let entry = original(next, &ctx.common, &ctx.dn, &mut ctx.original)?;
            let new_dn = ctx.new_dn();
            check_relocate(next, &ctx.common, entry.as_ref(), true, Some(&new_dn))?;
        }
        next.move_and_rename(ctx)
    }

    #[instrument(level = "debug", name = "aci::lookup", skip_all)]
    fn lookup(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut LookupContext,
    ) -> Result<EntrySealedCommitted, OperationError> {
        let mut entry = next.lookup(ctx)?;
        let core = next.core();
        if exempt(core, &ctx.common) || ctx.dn.is_root() {
            return Ok(entry);
        }
        let user = core.access.user_context(&ctx.common.ident);
        let tuples = tuples_for(next, &ctx.common, &entry);
        if !core.access.filter_readable(&user, &tuples, &mut entry) {
            security_access!(dn = %ctx.dn, "lookup refused");
            return Err(refused(core, &user, &tuples, &entry));
        }
        Ok(entry)
    }

    #[instrument(level = "debug", name = "aci::list", skip_all)]
    fn list(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut ListContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        let mut cursor = next.list(ctx)?;
        if !exempt(next.core(), &ctx.common) {
            add_search_filter(next.core(), &ctx.common, &mut cursor);
        }
        Ok(cursor)
    }

    #[instrument(level = "debug", name = "aci::search", skip_all)]
    fn search(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut SearchContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        let mut cursor = next.search(ctx)?;
        if !exempt(next.core(), &ctx.common) {
            add_search_filter(next.core(), &ctx.common, &mut cursor);
        }
        Ok(cursor)
    }

    #[instrument(level = "debug", name = "aci::compare", skip_all)]
    fn compare(&self, next: &NextInterceptor<'_>, ctx: &mut CompareContext) -> Result<bool, OperationError> {
        let core = next.core();
        if exempt(core, &ctx.common) {
            return next.compare(ctx);
        }
        let entry = lookup_for_access(next, &ctx.common, &ctx.dn)?;
        let user = core.access.user_context(&ctx.common.ident);
        let tuples = tuples_for(next, &ctx.common, entry.as_ref());
        if !core
            .access
            .has_permission(&tuples, &AccessRequest::entry(&user, entry.as_ref(), COMPARE))
        {
            security_access!(dn = %ctx.dn, "compare refused");
            return Err(refused(core, &user, &tuples, entry.as_ref()));
        }
        let (sa, value) = {
            let schema = core.schema.read();
            let sa = schema
                .resolve_attribute(ctx.attr.as_str())
                .cloned()
                .ok_or_else(|| SchemaError::InvalidAttribute(ctx.attr.to_string()))?;
            let value = schema.normalize_value(&sa, &ctx.value)?;
            (sa, value)
        };
        require(
            core,
            &tuples,
            &AccessRequest::attribute(&user, entry.as_ref(), &sa, Some(&value), COMPARE),
        )?;
        next.compare(ctx)
    }
}

/// Drop results the user may not browse, and hide what they may not read from the
/// rest.
fn add_search_filter(core: &ServiceCore, common: &OperationCommon, cursor: &mut EntryFilteringCursor) {
    let access = core.access.clone();
    let subentries = core.subentries.clone();
    let nexus = core.nexus.clone();
    let user = access.user_context(&common.ident);
    cursor.add_filter(Box::new(move |e: &mut EntrySealedCommitted| {
        let admin_point = if e.is_subentry() {
            e.dn().parent().and_then(|p| nexus.lookup_dn(&p).ok())
        } else {
            None
        };
        let tuples = access.entry_tuples(&*e, admin_point.as_deref(), &subentries);
        if !access.has_permission(&tuples, &AccessRequest::entry(&user, &*e, BROWSE)) {
            return Ok(false);
        }
        Ok(access.filter_readable(&user, &tuples, e))
    }));
}

#[cfg(test)]
mod tests {
    use crate::event::{SearchRequest, SearchScope};
    use crate::prelude::*;

    const READ_ONLY_ACI: &str = r#"{
        "identificationTag": "readOnly",
        "precedence": 10,
        "authenticationLevel": "simple",
        "userFirst": {
            "userClasses": { "allUsers": true },
            "userPermissions": [
                {
                    "protectedItems": { "entry": true, "allUserAttributeTypesAndValues": true },
                    "grantsAndDenials": ["grantRead", "grantBrowse", "grantReturnDN", "grantCompare", "grantDiscloseOnError"]
                }
            ]
        }
    }"#;

    /// An item granting `grants` to every simply bound user on the entry and all of its
    /// user attributes.
    fn all_users_aci(tag: &str, grants: &[&str]) -> String {
        serde_json::json!({
            "identificationTag": tag,
            "precedence": 10,
            "authenticationLevel": "simple",
            "userFirst": {
                "userClasses": { "allUsers": true },
                "userPermissions": [{
                    "protectedItems": { "entry": true, "allUserAttributeTypesAndValues": true },
                    "grantsAndDenials": grants,
                }]
            }
        })
        .to_string()
    }

    fn person(dn: &str, cn: &str, sn: &str) -> EntryInit {
        entry_init!(
            dn,
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_CN, cn),
            (ATTR_SN, sn)
        )
    }

    fn populate(ds: &DirectoryService) -> Session {
        let admin = ds.admin_session();
        let mut alice = person("cn=alice,ou=system", "alice", "Alice");
        alice.add_ava(ATTR_USER_PASSWORD, "secret");
        admin.add(alice).unwrap();

        let mut target = person("cn=target,ou=system", "target", "Target");
        target.add_ava(ATTR_ENTRY_ACI, READ_ONLY_ACI);
        admin.add(target).unwrap();
        admin.add(person("cn=hidden,ou=system", "hidden", "Hidden")).unwrap();

        ds.bind("cn=alice,ou=system", b"secret").unwrap()
    }

    #[ds_test(access_control_enabled = true)]
    fn test_entry_aci_grants_reads(ds: &DirectoryService) {
        let alice = populate(ds);

        let target = alice.lookup("cn=target,ou=system", &[SELECT_ALL_USER]).unwrap();
        assert_eq!(target.get_ava_single_str(ATTR_SN), Some("Target"));
        assert_eq!(alice.compare("cn=target,ou=system", ATTR_SN, "Target"), Ok(true));

        // Without any grant the entry does not exist for alice.
        assert!(matches!(
            alice.lookup("cn=hidden,ou=system", &[SELECT_ALL_USER]),
            Err(OperationError::NoSuchObject { .. })
        ));

        let found = alice
            .search(SearchRequest::new(
                "ou=system",
                SearchScope::OneLevel,
                "(objectClass=person)",
            ))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_ava_single_str(ATTR_CN), Some("target"));
    }

    #[ds_test(access_control_enabled = true)]
    fn test_entry_aci_refuses_updates(ds: &DirectoryService) {
        let alice = populate(ds);

        // Disclosure is granted on the target, so the refusal names the real cause.
        assert_eq!(
            alice.modify("cn=target,ou=system", vec![m_replace(ATTR_SN, &["Changed"])]),
            Err(OperationError::InsufficientAccessRights)
        );
        assert!(matches!(
            alice.delete("cn=hidden,ou=system"),
            Err(OperationError::NoSuchObject { .. })
        ));
        assert_eq!(
            alice.add(person("cn=mallory,ou=system", "mallory", "Mallory")),
            Err(OperationError::InsufficientAccessRights)
        );

        // The administrator is not subject to any of it.
        let admin = ds.admin_session();
        admin
            .modify("cn=target,ou=system", vec![m_replace(ATTR_SN, &["Changed"])])
            .unwrap();
        let target = alice.lookup("cn=target,ou=system", &[SELECT_ALL_USER]).unwrap();
        assert_eq!(target.get_ava_single_str(ATTR_SN), Some("Changed"));
        admin.delete("cn=hidden,ou=system").unwrap();
    }

    #[ds_test(access_control_enabled = true)]
    fn test_invalid_aci_refused(ds: &DirectoryService) {
        let admin = ds.admin_session();
        let mut broken = person("cn=broken,ou=system", "broken", "Broken");
        broken.add_ava(
            ATTR_ENTRY_ACI,
            r#"{"identificationTag": "broken", "precedence": 1, "authenticationLevel": "none",
                "userFirst": {"userClasses": {"allUsers": true}, "userPermissions": [
                    {"protectedItems": {"entry": true}, "grantsAndDenials": ["grantEverything"]}]}}"#,
        );
        assert!(matches!(admin.add(broken), Err(OperationError::InvalidAciItem(_))));
        assert!(matches!(
            admin.lookup("cn=broken,ou=system", &[SELECT_ALL_USER]),
            Err(OperationError::NoSuchObject { .. })
        ));

        admin.add(person("cn=fine,ou=system", "fine", "Fine")).unwrap();
        assert!(matches!(
            admin.modify("cn=fine,ou=system", vec![m_add(ATTR_ENTRY_ACI, &["{}"])]),
            Err(OperationError::InvalidAciItem(_))
        ));
    }

    #[ds_test(access_control_enabled = true)]
    fn test_browse_and_read_are_both_needed_to_search(ds: &DirectoryService) {
        let alice = populate(ds);
        let admin = ds.admin_session();
        let mut browsable = person("cn=browsable,ou=system", "browsable", "Browsable");
        browsable.add_ava(ATTR_ENTRY_ACI, all_users_aci("browseOnly", &["grantBrowse", "grantReturnDN"]));
        admin.add(browsable).unwrap();
        let mut readable = person("cn=readable,ou=system", "readable", "Readable");
        readable.add_ava(ATTR_ENTRY_ACI, all_users_aci("readOnly", &["grantRead"]));
        admin.add(readable).unwrap();

        let found = alice
            .search(SearchRequest::new(
                "ou=system",
                SearchScope::OneLevel,
                "(objectClass=person)",
            ))
            .unwrap();
        let names: Vec<&str> = found.iter().filter_map(|e| e.get_ava_single_str(ATTR_CN)).collect();
        assert_eq!(names, vec!["target"]);

        // Browse alone does not make the entry readable, read alone is enough for a lookup.
        assert!(matches!(
            alice.lookup("cn=browsable,ou=system", &[SELECT_ALL_USER]),
            Err(OperationError::NoSuchObject { .. })
        ));
        assert!(alice.lookup("cn=readable,ou=system", &[SELECT_ALL_USER]).is_ok());
    }

    #[ds_test(access_control_enabled = true)]
    fn test_relocation_needs_rename_export_and_import(ds: &DirectoryService) {
        let alice = populate(ds);

        assert_eq!(
            alice.rename("cn=target,ou=system", "cn=renamed", false),
            Err(OperationError::InsufficientAccessRights)
        );
        assert_eq!(
            alice.move_entry("cn=target,ou=system", DN_USERS),
            Err(OperationError::InsufficientAccessRights)
        );
        assert!(matches!(
            alice.rename("cn=hidden,ou=system", "cn=renamed", false),
            Err(OperationError::NoSuchObject { .. })
        ));

        let admin = ds.admin_session();
        let mut mover = person("cn=mover,ou=system", "mover", "Mover");
        mover.add_ava(
            ATTR_ENTRY_ACI,
            all_users_aci("exportOnly", &["grantRead", "grantBrowse", "grantDiscloseOnError", "grantExport"]),
        );
        admin.add(mover).unwrap();

        // Leaving is allowed, arriving is not.
        assert_eq!(
            alice.move_entry("cn=mover,ou=system", DN_USERS),
            Err(OperationError::InsufficientAccessRights)
        );
        // Moving and renaming at once also needs the rename permission.
        assert_eq!(
            alice.move_and_rename("cn=mover,ou=system", DN_USERS, "cn=moved", true),
            Err(OperationError::InsufficientAccessRights)
        );

        let relocatable = all_users_aci(
            "relocatable",
            &["grantRead", "grantBrowse", "grantDiscloseOnError", "grantExport", "grantImport"],
        );
        admin
            .modify("cn=mover,ou=system", vec![m_replace(ATTR_ENTRY_ACI, &[relocatable.as_str()])])
            .unwrap();
        alice.move_entry("cn=mover,ou=system", DN_USERS).unwrap();
        assert!(alice.lookup("cn=mover,ou=users,ou=system", &[SELECT_ALL_USER]).is_ok());
        assert!(matches!(
            alice.lookup("cn=mover,ou=system", &[SELECT_ALL_USER]),
            Err(OperationError::NoSuchObject { .. })
        ));
    }

    #[ds_test(access_control_enabled = true)]
    fn test_subentry_governed_access(ds: &DirectoryService) {
        let alice = populate(ds);
        let admin = ds.admin_session();
        let read = all_users_aci("areaRead", &["grantRead", "grantBrowse", "grantReturnDN"]);
        let mut area = entry_init!(
            "ou=area,ou=system",
            (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
            (ATTR_OU, "area"),
            (ATTR_ADMINISTRATIVE_ROLE, ROLE_ACCESS_CONTROL_SPECIFIC_AREA)
        );
        area.add_ava(ATTR_SUBENTRY_ACI, read.as_str());
        admin.add(area).unwrap();
        admin
            .add(entry_init!(
                "ou=people,ou=area,ou=system",
                (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
                (ATTR_OU, "people")
            ))
            .unwrap();
        admin.add(person("cn=before,ou=people,ou=area,ou=system", "before", "Before")).unwrap();
        admin.add(person("cn=outside,ou=area,ou=system", "outside", "Outside")).unwrap();
        let mut acl = entry_init!(
            "cn=acl,ou=area,ou=system",
            (ATTR_OBJECTCLASS, CLASS_SUBENTRY),
            (ATTR_OBJECTCLASS, CLASS_ACCESS_CONTROL_SUBENTRY),
            (ATTR_CN, "acl"),
            (ATTR_SUBTREE_SPECIFICATION, r#"{"base": "ou=people"}"#)
        );
        acl.add_ava(ATTR_PRESCRIPTIVE_ACI, read.as_str());
        admin.add(acl).unwrap();
        admin.add(person("cn=after,ou=people,ou=area,ou=system", "after", "After")).unwrap();

        // The prescriptive item covers what the subtree selects, old and new entries alike.
        for dn in ["cn=before,ou=people,ou=area,ou=system", "cn=after,ou=people,ou=area,ou=system"] {
            assert!(alice.lookup(dn, &[SELECT_ALL_USER]).is_ok());
        }
        for dn in ["cn=outside,ou=area,ou=system", "ou=area,ou=system"] {
            assert!(matches!(
                alice.lookup(dn, &[SELECT_ALL_USER]),
                Err(OperationError::NoSuchObject { .. })
            ));
        }
        // The subentry itself is governed by the subentryACI of its administrative point.
        assert!(alice.lookup("cn=acl,ou=area,ou=system", &[SELECT_ALL_USER]).is_ok());

        admin.delete("cn=acl,ou=area,ou=system").unwrap();
        assert!(matches!(
            alice.lookup("cn=before,ou=people,ou=area,ou=system", &[SELECT_ALL_USER]),
            Err(OperationError::NoSuchObject { .. })
        ));
    }
}
