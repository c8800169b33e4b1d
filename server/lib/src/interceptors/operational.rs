//! Maintains the operational attributes the server owns: who created and last changed
//! an entry, when, its identity and its change sequence number.

use uuid::Uuid;

use crate::csn::{duration_from_epoch_now, generalized_time};
use crate::interceptors::{Interceptor, NextInterceptor};
use crate::prelude::*;
use crate::server::ServiceCore;

pub struct OperationalAttributeInterceptor;

/// The name recorded as creator or modifier. Internal operations act for the
/// administrator and anonymous ones for the empty name.
fn principal(core: &ServiceCore, common: &OperationCommon) -> String {
    let dn = match common.ident.dn() {
        Some(dn) => dn,
        None if common.ident.is_internal() => &core.dns.admin,
        None => return String::new(),
    };
    if core.config.denormalize_op_attrs {
        dn.to_string()
    } else {
        dn.to_norm_string()
    }
}

/// System modifications restamping the modifier of a changed entry.
fn modified_stamps(
    core: &ServiceCore,
    common: &OperationCommon,
    mods: &mut ModifyList<ModifyValid>,
) -> Result<(), OperationError> {
    let schema = core.schema.read();
    let now = generalized_time(duration_from_epoch_now());
    let csn = core.csn.next().to_string();
    for (attr, value) in [
        (ATTR_MODIFIERS_NAME, principal(core, common)),
        (ATTR_MODIFY_TIMESTAMP, now),
        (ATTR_ENTRY_CSN, csn),
    ] {
        let (sa, v) = schema.value_for(attr, &value)?;
        mods.push_system(ModifyOp::Replace, sa, vec![v]);
    }
    Ok(())
}

impl Interceptor for OperationalAttributeInterceptor {
    fn id(&self) -> &'static str {
        "operational"
    }

    fn flag(&self) -> Bypass {
        Bypass::OPERATIONAL
    }

    #[instrument(level = "debug", name = "operational::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        let core = next.core();
        {
            let schema = core.schema.read();
            if !ctx.common.ident.is_internal() {
                if let Some(attr) = ctx
                    .entry
                    .attrs()
                    .find(|a| a.schema().no_user_modification)
                {
                    security_access!(dn = %ctx.dn, attr = %attr.name(), "client supplied a server owned attribute");
                    return Err(OperationError::InsufficientAccessRights);
                }
            }

            let stamps = [
                (ATTR_ENTRY_UUID, Uuid::new_v4().to_string()),
                (ATTR_ENTRY_CSN, core.csn.next().to_string()),
                (ATTR_CREATORS_NAME, principal(core, &ctx.common)),
                (
                    ATTR_CREATE_TIMESTAMP,
                    generalized_time(duration_from_epoch_now()),
                ),
            ];
            // Entries restored from a reverse record keep what they had.
            for (attr, value) in stamps {
                if ctx.entry.attribute_pres(attr) {
                    continue;
                }
                let (sa, v) = schema.value_for(attr, &value)?;
                ctx.entry.add_ava(sa, v);
            }
        }
        next.add(ctx)
    }

    #[instrument(level = "debug", name = "operational::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        modified_stamps(next.core(), &ctx.common, &mut ctx.mods)?;
        next.modify(ctx)
    }

    #[instrument(level = "debug", name = "operational::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        modified_stamps(next.core(), &ctx.common, &mut ctx.mods)?;
        next.rename(ctx)
    }

    #[instrument(level = "debug", name = "operational::move", skip_all)]
    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        modified_stamps(next.core(), &ctx.common, &mut ctx.mods)?;
        next.move_entry(ctx)
    }

    #[instrument(level = "debug", name = "operational::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        modified_stamps(next.core(), &ctx.common, &mut ctx.mods)?;
        next.move_and_rename(ctx)
    }
}
