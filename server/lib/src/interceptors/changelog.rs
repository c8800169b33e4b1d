//! Records each first mutation in the change log together with the records that undo
//! it. Nothing is recorded for a failed operation.

use crate::interceptors::{Interceptor, NextInterceptor};
use crate::ldif::LdifRecord;
use crate::prelude::*;
use crate::server::changelog::{
    forward_modify, forward_relocate, is_tombstone_only, reverse_add, reverse_delete, reverse_modify,
    reverse_relocate,
};
use crate::server::ServiceCore;

pub struct ChangeLogInterceptor;

fn recording(core: &ServiceCore, common: &OperationCommon) -> bool {
    core.changelog.is_enabled() && common.is_first()
}

/// The entry before the change. Earlier stages normally fetched it already.
fn before(
    core: &ServiceCore,
    dn: &Dn,
    original: &Option<Arc<EntrySealedCommitted>>,
) -> Result<Arc<EntrySealedCommitted>, OperationError> {
    match original {
        Some(e) => Ok(e.clone()),
        None => core.nexus.lookup_dn(dn),
    }
}

fn record(core: &ServiceCore, common: &mut OperationCommon, forward: LdifRecord, reverse: Vec<LdifRecord>) {
    let event = core
        .changelog
        .log(common.ident.principal_name(), forward, reverse);
    admin_debug!(revision = event.revision, dn = %event.forward.dn(), "changelog recorded");
    common.changelog_event = Some(event);
}

impl Interceptor for ChangeLogInterceptor {
    fn id(&self) -> &'static str {
        "changelog"
    }

    fn flag(&self) -> Bypass {
        Bypass::CHANGELOG
    }

    fn init(&self, core: &ServiceCore) -> Result<(), OperationError> {
        admin_info!(enabled = core.changelog.is_enabled(), "changelog");
        Ok(())
    }

    #[instrument(level = "debug", name = "changelog::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        let core = next.core();
        next.add(ctx)?;
        if recording(core, &ctx.common) {
            let forward = match &ctx.added {
                Some(e) => e.to_entry_init(),
                None => ctx.entry.to_entry_init(),
            };
            record(core, &mut ctx.common, LdifRecord::Add(forward), reverse_add(&ctx.dn));
        }
        Ok(())
    }

    #[instrument(level = "debug", name = "changelog::delete", skip_all)]
    fn delete(&self, next: &NextInterceptor<'_>, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        let core = next.core();
        if !recording(core, &ctx.common) {
            return next.delete(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original)?;
        next.delete(ctx)?;
        let reverse = reverse_delete(&original, core.changelog.policy());
        record(
            core,
            &mut ctx.common,
            LdifRecord::Delete {
                dn: ctx.dn.to_string(),
            },
            reverse,
        );
        Ok(())
    }

    #[instrument(level = "debug", name = "changelog::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        let core = next.core();
        if !recording(core, &ctx.common) || is_tombstone_only(&ctx.mods) {
            return next.modify(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original)?;
        next.modify(ctx)?;
        let reverse = reverse_modify(&original, &ctx.mods);
        let forward = forward_modify(&ctx.dn, &ctx.mods);
        record(core, &mut ctx.common, forward, reverse);
        Ok(())
    }

    #[instrument(level = "debug", name = "changelog::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        let core = next.core();
        if !recording(core, &ctx.common) {
            return next.rename(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original)?;
        next.rename(ctx)?;
        let forward = forward_relocate(&ctx.dn, Some(&ctx.new_rdn), ctx.delete_old_rdn, None);
        let reverse = reverse_relocate(&original, &ctx.new_dn());
        record(core, &mut ctx.common, forward, reverse);
        Ok(())
    }

    #[instrument(level = "debug", name = "changelog::move", skip_all)]
    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        let core = next.core();
        if !recording(core, &ctx.common) {
            return next.move_entry(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original)?;
        next.move_entry(ctx)?;
        let forward = forward_relocate(&ctx.dn, None, false, Some(&ctx.new_superior));
        let reverse = reverse_relocate(&original, &ctx.new_dn());
        record(core, &mut ctx.common, forward, reverse);
        Ok(())
    }

    #[instrument(level = "debug", name = "changelog::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        let core = next.core();
        if !recording(core, &ctx.common) {
            return next.move_and_rename(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original)?;
        next.move_and_rename(ctx)?;
        let forward = forward_relocate(
            &ctx.dn,
            Some(&ctx.new_rdn),
            ctx.delete_old_rdn,
            Some(&ctx.new_superior),
        );
        let reverse = reverse_relocate(&original, &ctx.new_dn());
        record(core, &mut ctx.common, forward, reverse);
        Ok(())
    }
}
