//! Runs the stored procedures of matching triggers once an operation has succeeded.
//! A failing procedure fails the operation for the caller, but the change it was
//! fired for has already been applied.

use crate::event::OperationKind;
use crate::interceptors::{Interceptor, NextInterceptor};
use crate::prelude::*;
use crate::server::triggers::FiredChange;
use crate::server::ServiceCore;

pub struct TriggerInterceptor;

fn armed(core: &ServiceCore, common: &OperationCommon) -> bool {
    common.is_first() && !core.triggers.is_empty()
}

fn before(
    core: &ServiceCore,
    dn: &Dn,
    original: &Option<Arc<EntrySealedCommitted>>,
) -> Option<Arc<EntrySealedCommitted>> {
    match original {
        Some(e) => Some(e.clone()),
        None => core.nexus.lookup_dn(dn).ok(),
    }
}

impl Interceptor for TriggerInterceptor {
    fn id(&self) -> &'static str {
        "trigger"
    }

    fn flag(&self) -> Bypass {
        Bypass::TRIGGER
    }

    #[instrument(level = "debug", name = "trigger::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        next.add(ctx)?;
        let core = next.core();
        if !armed(core, &ctx.common) {
            return Ok(());
        }
        let change = FiredChange {
            kind: OperationKind::Add,
            dn: &ctx.dn,
            new_dn: None,
            before: None,
            after: ctx.added.clone(),
        };
        core.triggers.fire(core, &ctx.common, change)
    }

    #[instrument(level = "debug", name = "trigger::delete", skip_all)]
    fn delete(&self, next: &NextInterceptor<'_>, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        let core = next.core();
        if !armed(core, &ctx.common) {
            return next.delete(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original);
        next.delete(ctx)?;
        let change = FiredChange {
            kind: OperationKind::Delete,
            dn: &ctx.dn,
            new_dn: None,
            before: original,
            after: None,
        };
        core.triggers.fire(core, &ctx.common, change)
    }

    #[instrument(level = "debug", name = "trigger::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        let core = next.core();
        if !armed(core, &ctx.common) {
            return next.modify(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original);
        next.modify(ctx)?;
        let change = FiredChange {
            kind: OperationKind::Modify,
            dn: &ctx.dn,
            new_dn: None,
            before: original,
            after: ctx.altered.clone(),
        };
        core.triggers.fire(core, &ctx.common, change)
    }

    #[instrument(level = "debug", name = "trigger::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        let core = next.core();
        if !armed(core, &ctx.common) {
            return next.rename(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original);
        next.rename(ctx)?;
        let change = FiredChange {
            kind: OperationKind::Rename,
            dn: &ctx.dn,
            new_dn: Some(ctx.new_dn()),
            before: original,
            after: ctx.altered.clone(),
        };
        core.triggers.fire(core, &ctx.common, change)
    }

    #[instrument(level = "debug", name = "trigger::move", skip_all)]
    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        let core = next.core();
        if !armed(core, &ctx.common) {
            return next.move_entry(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original);
        next.move_entry(ctx)?;
        let change = FiredChange {
            kind: OperationKind::Move,
            dn: &ctx.dn,
            new_dn: Some(ctx.new_dn()),
            before: original,
            after: ctx.altered.clone(),
        };
        core.triggers.fire(core, &ctx.common, change)
    }

    #[instrument(level = "debug", name = "trigger::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        let core = next.core();
        if !armed(core, &ctx.common) {
            return next.move_and_rename(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original);
        next.move_and_rename(ctx)?;
        let change = FiredChange {
            kind: OperationKind::MoveAndRename,
            dn: &ctx.dn,
            new_dn: Some(ctx.new_dn()),
            before: original,
            after: ctx.altered.clone(),
        };
        core.triggers.fire(core, &ctx.common, change)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::event::{OperationKind, SearchScope};
    use crate::prelude::*;
    use crate::server::triggers::{StoredProcedure, TriggerInvocation, TriggerSpecification};

    fn backup_on_delete() -> Arc<dyn StoredProcedure> {
        Arc::new(|inv: &TriggerInvocation<'_>| -> Result<(), OperationError> {
            let Some(before) = inv.before.as_ref() else {
                return Ok(());
            };
            let cn = before.get_ava_single_str(ATTR_CN).unwrap_or("unknown").to_string();
            inv.add(entry_init!(
                &format!("cn={},ou=backup,ou=system", cn),
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, cn.as_str()),
                (ATTR_SN, "BACKUP")
            ))
        })
    }

    #[ds_test]
    fn test_trigger_runs_after_delete(ds: &DirectoryService) {
        let admin = ds.admin_session();
        admin
            .add(entry_init!(
                "ou=backup,ou=system",
                (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
                (ATTR_OU, "backup")
            ))
            .unwrap();
        admin
            .add(entry_init!(
                "ou=people,ou=system",
                (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
                (ATTR_OU, "people")
            ))
            .unwrap();
        admin
            .add(entry_init!(
                "cn=test,ou=people,ou=system",
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, "test"),
                (ATTR_SN, "TEST")
            ))
            .unwrap();

        let base = ds.parse_dn("ou=people,ou=system").unwrap();
        ds.triggers()
            .register(
                TriggerSpecification::after("backup", OperationKind::Delete, base.clone(), SearchScope::OneLevel),
                backup_on_delete(),
            )
            .unwrap();
        // Names are unique.
        assert!(ds
            .triggers()
            .register(
                TriggerSpecification::after("backup", OperationKind::Delete, base, SearchScope::Subtree),
                backup_on_delete(),
            )
            .is_err());

        admin.delete("cn=test,ou=people,ou=system").unwrap();
        let backup = admin
            .lookup("cn=test,ou=backup,ou=system", &[SELECT_ALL_USER])
            .unwrap();
        assert_eq!(backup.get_ava_single_str(ATTR_SN), Some("BACKUP"));

        // Deleting the backup is outside the trigger's region.
        admin.delete("cn=test,ou=backup,ou=system").unwrap();
        assert!(admin
            .lookup("cn=test,ou=backup,ou=system", &[SELECT_ALL_USER])
            .is_err());
    }

    #[ds_test]
    fn test_trigger_failure_is_reported(ds: &DirectoryService) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let base = ds.parse_dn("ou=system").unwrap();
        ds.triggers()
            .register(
                TriggerSpecification::after("refuse", OperationKind::Add, base, SearchScope::Subtree),
                Arc::new(move |_inv: &TriggerInvocation<'_>| -> Result<(), OperationError> {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(OperationError::UnwillingToPerform("refused by trigger".to_string()))
                }),
            )
            .unwrap();
        let admin = ds.admin_session();
        let r = admin.add(entry_init!(
            "ou=fired,ou=system",
            (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
            (ATTR_OU, "fired")
        ));
        assert!(matches!(r, Err(OperationError::UnwillingToPerform(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The change itself stands.
        assert!(admin.lookup("ou=fired,ou=system", &[SELECT_ALL_USER]).is_ok());

        assert!(ds.triggers().unregister("refuse"));
        admin
            .add(entry_init!(
                "ou=quiet,ou=system",
                (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
                (ATTR_OU, "quiet")
            ))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
