//! The fixed authorization rules used when access control is disabled. They protect
//! the administrator and the users, groups and configuration areas of the system
//! partition: only an administrator may change them, and other users only see their
//! own entry below the users area.

use crate::be::search::EntryFilteringCursor;
use crate::interceptors::{Interceptor, NextInterceptor};
use crate::prelude::*;
use crate::server::ServiceCore;

pub struct DefaultAuthorizationInterceptor;

fn applies(core: &ServiceCore, common: &OperationCommon) -> bool {
    !core.access.is_enabled() && !common.ident.is_internal() && !common.ident.is_admin()
}

fn protected(core: &ServiceCore, dn: &Dn) -> bool {
    let dns = &core.dns;
    *dn == dns.admin
        || *dn == dns.administrators
        || dn.is_descendant_of(&dns.users)
        || dn.is_descendant_of(&dns.groups)
        || dn.is_descendant_or_self(&dns.configuration)
}

fn is_self(common: &OperationCommon, dn: &Dn) -> bool {
    common.ident.dn() == Some(dn)
}

/// Names a user other than the administrator may not change.
fn check_alteration(
    core: &ServiceCore,
    common: &OperationCommon,
    dn: &Dn,
    allow_self: bool,
) -> Result<(), OperationError> {
    if !applies(core, common) || !protected(core, dn) || (allow_self && is_self(common, dn)) {
        return Ok(());
    }
    security_access!(dn = %dn, ident = %common.ident, "only an administrator may alter this entry");
    Err(OperationError::InsufficientAccessRights)
}

/// Entries below the users area are only visible to their owner.
fn visible(core: &ServiceCore, common: &OperationCommon, dn: &Dn) -> bool {
    if !applies(core, common) {
        return true;
    }
    let dns = &core.dns;
    if *dn == dns.admin || dn.is_descendant_of(&dns.users) {
        return is_self(common, dn);
    }
    true
}

fn hide_others(core: &ServiceCore, common: &OperationCommon, cursor: &mut EntryFilteringCursor) {
    if !applies(core, common) {
        return;
    }
    let users = core.dns.users.clone();
    let admin = core.dns.admin.clone();
    let own = common.ident.dn().cloned();
    cursor.add_filter(Box::new(move |e: &mut EntrySealedCommitted| {
        let dn = e.dn();
        if *dn == admin || dn.is_descendant_of(&users) {
            return Ok(own.as_ref() == Some(dn));
        }
        Ok(true)
    }));
}

impl Interceptor for DefaultAuthorizationInterceptor {
    fn id(&self) -> &'static str {
        "default_authz"
    }

    fn flag(&self) -> Bypass {
        Bypass::DEFAULT_AUTHZ
    }

    #[instrument(level = "debug", name = "default_authz::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        check_alteration(next.core(), &ctx.common, &ctx.dn, false)?;
        next.add(ctx)
    }

    #[instrument(level = "debug", name = "default_authz::delete", skip_all)]
    fn delete(&self, next: &NextInterceptor<'_>, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        check_alteration(next.core(), &ctx.common, &ctx.dn, false)?;
        next.delete(ctx)
    }

    #[instrument(level = "debug", name = "default_authz::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        check_alteration(next.core(), &ctx.common, &ctx.dn, true)?;
        next.modify(ctx)
    }

    #[instrument(level = "debug", name = "default_authz::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        check_alteration(next.core(), &ctx.common, &ctx.dn, false)?;
        next.rename(ctx)
    }

    #[instrument(level = "debug", name = "default_authz::move", skip_all)]
    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        let core = next.core();
        check_alteration(core, &ctx.common, &ctx.dn, false)?;
        check_alteration(core, &ctx.common, &ctx.new_dn(), false)?;
        next.move_entry(ctx)
    }

    #[instrument(level = "debug", name = "default_authz::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        let core = next.core();
        check_alteration(core, &ctx.common, &ctx.dn, false)?;
        check_alteration(core, &ctx.common, &ctx.new_dn(), false)?;
        next.move_and_rename(ctx)
    }

    #[instrument(level = "debug", name = "default_authz::lookup", skip_all)]
    fn lookup(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut LookupContext,
    ) -> Result<EntrySealedCommitted, OperationError> {
        if !visible(next.core(), &ctx.common, &ctx.dn) {
            security_access!(dn = %ctx.dn, "lookup of another user's entry");
            return Err(OperationError::InsufficientAccessRights);
        }
        next.lookup(ctx)
    }

    #[instrument(level = "debug", name = "default_authz::list", skip_all)]
    fn list(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut ListContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        let mut cursor = next.list(ctx)?;
        hide_others(next.core(), &ctx.common, &mut cursor);
        Ok(cursor)
    }

    #[instrument(level = "debug", name = "default_authz::search", skip_all)]
    fn search(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut SearchContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        let mut cursor = next.search(ctx)?;
        hide_others(next.core(), &ctx.common, &mut cursor);
        Ok(cursor)
    }

    #[instrument(level = "debug", name = "default_authz::compare", skip_all)]
    fn compare(&self, next: &NextInterceptor<'_>, ctx: &mut CompareContext) -> Result<bool, OperationError> {
        if !visible(next.core(), &ctx.common, &ctx.dn) {
            security_access!(dn = %ctx.dn, "compare against another user's entry");
            return Err(OperationError::InsufficientAccessRights);
        }
        next.compare(ctx)
    }
}
