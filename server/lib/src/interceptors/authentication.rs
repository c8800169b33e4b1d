//! Proves who a session is on bind, and keeps anonymous callers out of everything but
//! the root DSE unless the service allows anonymous access.

use crate::be::search::EntryFilteringCursor;
use crate::event::{OperationKind, SearchScope};
use crate::interceptors::{lookup_for_access, Interceptor, NextInterceptor};
use crate::prelude::*;
use crate::server::ServiceCore;

pub struct AuthenticationInterceptor;

fn check_access(
    core: &ServiceCore,
    common: &OperationCommon,
    kind: OperationKind,
    dn: &Dn,
) -> Result<(), OperationError> {
    if common.ident.is_anonymous() && !core.config.allow_anonymous_access {
        security_access!(op = %kind, dn = %dn, "anonymous access refused");
        return Err(OperationError::InsufficientAccessRights);
    }
    Ok(())
}

impl Interceptor for AuthenticationInterceptor {
    fn id(&self) -> &'static str {
        "authentication"
    }

    fn flag(&self) -> Bypass {
        Bypass::AUTHENTICATION
    }

    #[instrument(level = "debug", name = "authentication::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        check_access(next.core(), &ctx.common, OperationKind::Add, &ctx.dn)?;
        next.add(ctx)
    }

    #[instrument(level = "debug", name = "authentication::delete", skip_all)]
    fn delete(&self, next: &NextInterceptor<'_>, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        check_access(next.core(), &ctx.common, OperationKind::Delete, &ctx.dn)?;
        next.delete(ctx)
    }

    #[instrument(level = "debug", name = "authentication::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        check_access(next.core(), &ctx.common, OperationKind::Modify, &ctx.dn)?;
        next.modify(ctx)
    }

    #[instrument(level = "debug", name = "authentication::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        check_access(next.core(), &ctx.common, OperationKind::Rename, &ctx.dn)?;
        next.rename(ctx)
    }

    #[instrument(level = "debug", name = "authentication::move", skip_all)]
    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        check_access(next.core(), &ctx.common, OperationKind::Move, &ctx.dn)?;
        next.move_entry(ctx)
    }

    #[instrument(level = "debug", name = "authentication::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        check_access(next.core(), &ctx.common, OperationKind::MoveAndRename, &ctx.dn)?;
        next.move_and_rename(ctx)
    }

    #[instrument(level = "debug", name = "authentication::lookup", skip_all)]
    fn lookup(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut LookupContext,
    ) -> Result<EntrySealedCommitted, OperationError> {
        // The root DSE is always readable.
        if !ctx.dn.is_root() {
            check_access(next.core(), &ctx.common, OperationKind::Lookup, &ctx.dn)?;
        }
        next.lookup(ctx)
    }

    #[instrument(level = "debug", name = "authentication::list", skip_all)]
    fn list(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut ListContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        check_access(next.core(), &ctx.common, OperationKind::List, &ctx.dn)?;
        next.list(ctx)
    }

    #[instrument(level = "debug", name = "authentication::search", skip_all)]
    fn search(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut SearchContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        if !(ctx.base.is_root() && ctx.scope == SearchScope::Base) {
            check_access(next.core(), &ctx.common, OperationKind::Search, &ctx.base)?;
        }
        next.search(ctx)
    }

    #[instrument(level = "debug", name = "authentication::compare", skip_all)]
    fn compare(&self, next: &NextInterceptor<'_>, ctx: &mut CompareContext) -> Result<bool, OperationError> {
        check_access(next.core(), &ctx.common, OperationKind::Compare, &ctx.dn)?;
        next.compare(ctx)
    }

    #[instrument(level = "debug", name = "authentication::bind", skip_all)]
    fn bind(&self, next: &NextInterceptor<'_>, ctx: &mut BindContext) -> Result<(), OperationError> {
        let core = next.core();
        if ctx.dn.is_root() {
            if !ctx.credentials.is_empty() {
                security_info!("credentials given without a name");
                return Err(OperationError::InvalidCredentials);
            }
            security_info!("anonymous bind");
            ctx.authenticated = Some(Identity::anonymous());
            return next.bind(ctx);
        }
        if ctx.credentials.is_empty() {
            // An unauthenticated bind, RFC 4513 section 5.1.2.
            security_info!(dn = %ctx.dn, "refusing bind with a name and no password");
            return Err(OperationError::UnwillingToPerform(
                "unauthenticated binds are not allowed".to_string(),
            ));
        }

        let entry = match lookup_for_access(next, &ctx.common, &ctx.dn) {
            Ok(e) => e,
            Err(OperationError::NoSuchObject { .. }) => {
                security_info!(dn = %ctx.dn, "bind to a name that does not exist");
                return Err(OperationError::InvalidCredentials);
            }
            Err(e) => return Err(e),
        };
        let proven = entry
            .get_ava_set(ATTR_USER_PASSWORD)
            .map(|vs| vs.iter().any(|v| v.up_bytes() == ctx.credentials.as_slice()))
            .unwrap_or(false);
        if !proven {
            security_info!(dn = %ctx.dn, "bind with invalid credentials");
            return Err(OperationError::InvalidCredentials);
        }

        let admin = *entry.dn() == core.dns.admin
            || core
                .access
                .groups()
                .is_member(&core.dns.administrators, entry.dn());
        security_info!(dn = %entry.dn(), admin, "bind succeeded");
        ctx.authenticated = Some(Identity::user(
            entry.dn().clone(),
            admin,
            AuthenticationLevel::Simple,
        ));
        next.bind(ctx)
    }
}
