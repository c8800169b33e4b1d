//! Tells registered listeners about mutations once they have been applied.

use crate::event::OperationKind;
use crate::interceptors::{Interceptor, NextInterceptor};
use crate::prelude::*;
use crate::server::events::ChangeNotification;
use crate::server::ServiceCore;

pub struct EventInterceptor;

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

fn fire(
    core: &ServiceCore,
    common: &OperationCommon,
    kind: OperationKind,
    dn: &Dn,
    new_dn: Option<Dn>,
    before: Option<Arc<EntrySealedCommitted>>,
    after: Option<Arc<EntrySealedCommitted>>,
) {
    let change = ChangeNotification {
        kind,
        dn: dn.clone(),
        new_dn,
        before,
        after,
        principal: common.ident.principal_name(),
    };
    let notified = core.events.fire(&change);
    if notified > 0 {
        request_trace!(%kind, %dn, notified, "change notified");
    }
}

impl Interceptor for EventInterceptor {
    fn id(&self) -> &'static str {
        "event"
    }

    fn flag(&self) -> Bypass {
        Bypass::EVENT
    }

    #[instrument(level = "debug", name = "event::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        next.add(ctx)?;
        let core = next.core();
        if !core.events.is_empty() {
            let after = ctx.added.clone();
            fire(core, &ctx.common, OperationKind::Add, &ctx.dn, None, None, after);
        }
        Ok(())
    }

    #[instrument(level = "debug", name = "event::delete", skip_all)]
    fn delete(&self, next: &NextInterceptor<'_>, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        let core = next.core();
        if core.events.is_empty() {
            return next.delete(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original);
        next.delete(ctx)?;
        fire(core, &ctx.common, OperationKind::Delete, &ctx.dn, None, original, None);
        Ok(())
    }

    #[instrument(level = "debug", name = "event::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        let core = next.core();
        if core.events.is_empty() {
            return next.modify(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original);
        next.modify(ctx)?;
        let after = ctx.altered.clone();
        fire(core, &ctx.common, OperationKind::Modify, &ctx.dn, None, original, after);
        Ok(())
    }

    #[instrument(level = "debug", name = "event::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        let core = next.core();
        if core.events.is_empty() {
            return next.rename(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original);
        next.rename(ctx)?;
        let after = ctx.altered.clone();
        fire(
            core,
            &ctx.common,
            OperationKind::Rename,
            &ctx.dn,
            Some(ctx.new_dn()),
            original,
            after,
        );
        Ok(())
    }

    #[instrument(level = "debug", name = "event::move", skip_all)]
    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        let core = next.core();
        if core.events.is_empty() {
            return next.move_entry(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original);
        next.move_entry(ctx)?;
        let after = ctx.altered.clone();
        fire(
            core,
            &ctx.common,
            OperationKind::Move,
            &ctx.dn,
            Some(ctx.new_dn()),
            original,
            after,
        );
        Ok(())
    }

    #[instrument(level = "debug", name = "event::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        let core = next.core();
        if core.events.is_empty() {
            return next.move_and_rename(ctx);
        }
        let original = before(core, &ctx.dn, &ctx.original);
        next.move_and_rename(ctx)?;
        let after = ctx.altered.clone();
        fire(
            core,
            &ctx.common,
            OperationKind::MoveAndRename,
            &ctx.dn,
            Some(ctx.new_dn()),
            original,
            after,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::event::{OperationKind, SearchScope};
    use crate::prelude::*;
    use crate::server::events::{ChangeNotification, DirectoryListener, EventMask};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(OperationKind, String, Option<String>)>>);

    impl DirectoryListener for Recorder {
        fn notify(&self, change: &ChangeNotification) {
            self.0.lock().unwrap().push((
                change.kind,
                change.dn.to_string(),
                change.new_dn.as_ref().map(|d| d.to_string()),
            ));
        }
    }

    #[ds_test]
    fn test_listener_notified_after_mutations(ds: &DirectoryService) {
        let rec = Arc::new(Recorder::default());
        let id = ds
            .add_listener(
                rec.clone(),
                "ou=system",
                SearchScope::OneLevel,
                "(objectClass=person)",
                EventMask::ADD | EventMask::MODIFY | EventMask::RENAME | EventMask::DELETE,
            )
            .unwrap();

        let admin = ds.admin_session();
        admin
            .add(entry_init!(
                "cn=test,ou=system",
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, "test"),
                (ATTR_SN, "TEST")
            ))
            .unwrap();
        // Not a person, so the filter does not select it.
        admin
            .add(entry_init!(
                "ou=other,ou=system",
                (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
                (ATTR_OU, "other")
            ))
            .unwrap();
        // Refused operations are never announced.
        assert!(admin
            .modify("cn=missing,ou=system", vec![m_replace(ATTR_SN, &["X"])])
            .is_err());
        admin
            .modify("cn=test,ou=system", vec![m_replace(ATTR_SN, &["CHANGED"])])
            .unwrap();
        admin.rename("cn=test,ou=system", "cn=renamed", true).unwrap();
        admin.delete("cn=renamed,ou=system").unwrap();

        {
            let seen = rec.0.lock().unwrap();
            assert_eq!(
                *seen,
                vec![
                    (OperationKind::Add, "cn=test,ou=system".to_string(), None),
                    (OperationKind::Modify, "cn=test,ou=system".to_string(), None),
                    (
                        OperationKind::Rename,
                        "cn=test,ou=system".to_string(),
                        Some("cn=renamed,ou=system".to_string())
                    ),
                    (OperationKind::Delete, "cn=renamed,ou=system".to_string(), None),
                ]
            );
        }

        assert!(ds.remove_listener(id));
        admin
            .add(entry_init!(
                "cn=late,ou=system",
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, "late"),
                (ATTR_SN, "LATE")
            ))
            .unwrap();
        assert_eq!(rec.0.lock().unwrap().len(), 4);
    }

    #[ds_test]
    fn test_listener_mask_excludes_kinds(ds: &DirectoryService) {
        let rec = Arc::new(Recorder::default());
        ds.add_listener(
            rec.clone(),
            "ou=system",
            SearchScope::Subtree,
            "(objectClass=*)",
            EventMask::DELETE,
        )
        .unwrap();
        let admin = ds.admin_session();
        admin
            .add(entry_init!(
                "ou=gone,ou=system",
                (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
                (ATTR_OU, "gone")
            ))
            .unwrap();
        admin.delete("ou=gone,ou=system").unwrap();
        let seen = rec.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, OperationKind::Delete);
    }
}
