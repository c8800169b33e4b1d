//! Writes each first mutation to the journal before it is applied, then acknowledges
//! the revision if the operation succeeded and rejects it if it failed. A consumer
//! replaying the journal only applies acknowledged revisions.

use crate::interceptors::{Interceptor, NextInterceptor};
use crate::ldif::LdifRecord;
use crate::prelude::*;
use crate::server::changelog::{forward_modify, forward_relocate, is_tombstone_only};
use crate::server::ServiceCore;

pub struct JournalInterceptor;

/// Log `record`, run the operation, and resolve the revision with its outcome.
fn journaled<F>(
    core: &ServiceCore,
    common: &OperationCommon,
    record: impl FnOnce() -> LdifRecord,
    op: F,
) -> Result<(), OperationError>
where
    F: FnOnce() -> Result<(), OperationError>,
{
    if !core.journal.is_enabled() || !common.is_first() {
        return op();
    }
    let pending = core
        .journal
        .log(&common.ident.principal_name(), &record())?;
    match op() {
        Ok(()) => pending.ack(),
        Err(e) => {
            if let Err(nack_err) = pending.nack() {
                journal_error!(?nack_err, "unable to nack revision");
            }
            Err(e)
        }
    }
}

impl Interceptor for JournalInterceptor {
    fn id(&self) -> &'static str {
        "journal"
    }

    fn flag(&self) -> Bypass {
        Bypass::JOURNAL
    }

    fn init(&self, core: &ServiceCore) -> Result<(), OperationError> {
        admin_info!(enabled = core.journal.is_enabled(), "journal");
        Ok(())
    }

    fn destroy(&self) {
        admin_debug!("journal interceptor stopped");
    }

    #[instrument(level = "debug", name = "journal::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        let common = ctx.common.clone();
        let record = LdifRecord::Add(ctx.entry.to_entry_init());
        journaled(next.core(), &common, || record, || next.add(ctx))
    }

    #[instrument(level = "debug", name = "journal::delete", skip_all)]
    fn delete(&self, next: &NextInterceptor<'_>, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        let common = ctx.common.clone();
        let record = LdifRecord::Delete {
            dn: ctx.dn.to_string(),
        };
        journaled(next.core(), &common, || record, || next.delete(ctx))
    }

    #[instrument(level = "debug", name = "journal::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        if is_tombstone_only(&ctx.mods) {
            return next.modify(ctx);
        }
        let common = ctx.common.clone();
        let record = forward_modify(&ctx.dn, &ctx.mods);
        journaled(next.core(), &common, || record, || next.modify(ctx))
    }

    #[instrument(level = "debug", name = "journal::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        let common = ctx.common.clone();
        let record = forward_relocate(&ctx.dn, Some(&ctx.new_rdn), ctx.delete_old_rdn, None);
        journaled(next.core(), &common, || record, || next.rename(ctx))
    }

    #[instrument(level = "debug", name = "journal::move", skip_all)]
    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        let common = ctx.common.clone();
        let record = forward_relocate(&ctx.dn, None, false, Some(&ctx.new_superior));
        journaled(next.core(), &common, || record, || next.move_entry(ctx))
    }

    #[instrument(level = "debug", name = "journal::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        let common = ctx.common.clone();
        let record = forward_relocate(
            &ctx.dn,
            Some(&ctx.new_rdn),
            ctx.delete_old_rdn,
            Some(&ctx.new_superior),
        );
        journaled(next.core(), &common, || record, || next.move_and_rename(ctx))
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use crate::server::journal::JournalState;

    #[ds_test]
    fn test_journal_acks_and_nacks(ds: &DirectoryService) {
        let admin = ds.admin_session();
        let person = || {
            entry_init!(
                "cn=test,ou=system",
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, "test"),
                (ATTR_SN, "TEST")
            )
        };
        admin.add(person()).unwrap();
        // Refused by an earlier stage, so never journaled.
        assert!(admin.add(person()).is_err());
        // Refused by the partition after it was journaled.
        let r = admin.modify(
            "cn=test,ou=system",
            vec![m_replace(ATTR_ENTRY_UUID, &["00000000-0000-0000-0000-000000000001"])],
        );
        assert_eq!(r, Err(OperationError::InsufficientAccessRights));
        admin.delete("cn=test,ou=system").unwrap();

        let records = ds.journal().store().records().unwrap();
        let states: Vec<(String, JournalState)> = records
            .iter()
            .map(|r| (r.record.changetype().to_string(), r.state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("add".to_string(), JournalState::Acked),
                ("modify".to_string(), JournalState::Nacked),
                ("delete".to_string(), JournalState::Acked),
            ]
        );
        // Every issued revision is resolved.
        assert!(records.iter().all(|r| r.state != JournalState::Pending));
        assert_eq!(ds.journal().current_revision(), 3);
    }

    #[ds_test(journal_enabled = false)]
    fn test_journal_disabled(ds: &DirectoryService) {
        ds.admin_session()
            .add(entry_init!(
                "ou=nothing,ou=system",
                (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
                (ATTR_OU, "nothing")
            ))
            .unwrap();
        assert!(ds.journal().store().records().unwrap().is_empty());
    }
}
