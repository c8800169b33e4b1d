//! Interceptors are the cross cutting stages every directory operation passes through
//! on its way to the partition nexus. The chain is assembled once when the service
//! starts and never changes afterwards.
//!
//! Each stage receives the operation context and a [`NextInterceptor`] standing for the
//! rest of the chain. A stage may pass the context on untouched, rewrite it first,
//! inspect the result once `next` returns, or refuse the operation by returning an
//! error without calling `next` at all.
//!
//! An operation names the stages it skips in its [`Bypass`] set. The dispatcher
//! consults the set at every hop, so a call made from inside a stage (such as the
//! lookup access control needs to make a decision) can skip itself and anything else
//! that would recurse.

use crate::be::search::EntryFilteringCursor;
use crate::prelude::*;
use crate::server::ServiceCore;

pub mod aci;
pub mod authentication;
pub mod changelog;
pub mod collective;
pub mod default_authz;
pub mod event;
pub mod exception;
pub mod journal;
pub mod normalization;
pub mod operational;
pub mod schema;
pub mod subentry;
pub mod trigger;

pub trait Interceptor: Send + Sync {
    fn id(&self) -> &'static str;

    /// The bypass flag that skips this stage.
    fn flag(&self) -> Bypass;

    /// Called once, in chain order, before the service accepts operations. An error
    /// aborts the start of the service.
    fn init(&self, _core: &ServiceCore) -> Result<(), OperationError> {
        Ok(())
    }

    /// Called once, in reverse chain order, when the service shuts down.
    fn destroy(&self) {}

    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        next.add(ctx)
    }

    fn delete(&self, next: &NextInterceptor<'_>, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        next.delete(ctx)
    }

    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        next.modify(ctx)
    }

    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        next.rename(ctx)
    }

    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        next.move_entry(ctx)
    }

    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        next.move_and_rename(ctx)
    }

    fn lookup(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut LookupContext,
    ) -> Result<EntrySealedCommitted, OperationError> {
        next.lookup(ctx)
    }

    fn list(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut ListContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        next.list(ctx)
    }

    fn search(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut SearchContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        next.search(ctx)
    }

    fn compare(&self, next: &NextInterceptor<'_>, ctx: &mut CompareContext) -> Result<bool, OperationError> {
        next.compare(ctx)
    }

    fn bind(&self, next: &NextInterceptor<'_>, ctx: &mut BindContext) -> Result<(), OperationError> {
        next.bind(ctx)
    }

    fn unbind(&self, next: &NextInterceptor<'_>, ctx: &mut UnbindContext) -> Result<(), OperationError> {
        next.unbind(ctx)
    }
}

/// The rest of the chain, as seen from one stage.
pub struct NextInterceptor<'a> {
    core: &'a ServiceCore,
    pos: usize,
}

impl<'a> NextInterceptor<'a> {
    /// The whole chain, for a call entering at the first stage.
    pub(crate) fn head(core: &'a ServiceCore) -> Self {
        NextInterceptor { core, pos: 0 }
    }

    pub fn core(&self) -> &'a ServiceCore {
        self.core
    }

    fn next_for(&self, bypass: Bypass) -> Option<(usize, &'a dyn Interceptor)> {
        self.core
            .chain
            .iter()
            .enumerate()
            .skip(self.pos)
            .find(|(_, i)| !bypass.intersects(i.flag()))
            .map(|(n, i)| (n, i.as_ref()))
    }
}

macro_rules! dispatch {
    ($($op:ident($ctx:ty) -> $ret:ty;)*) => {
        impl<'a> NextInterceptor<'a> {
            $(
                pub fn $op(&self, ctx: &mut $ctx) -> Result<$ret, OperationError> {
                    match self.next_for(ctx.common.bypass) {
                        Some((n, interceptor)) => {
                            let next = NextInterceptor {
                                core: self.core,
                                pos: n + 1,
                            };
                            interceptor.$op(&next, ctx)
                        }
                        None => self.core.nexus.$op(ctx),
                    }
                }
            )*
        }
    };
}

dispatch! {
    add(AddContext) -> ();
    delete(DeleteContext) -> ();
    modify(ModifyContext) -> ();
    rename(RenameContext) -> ();
    move_entry(MoveContext) -> ();
    move_and_rename(MoveAndRenameContext) -> ();
    lookup(LookupContext) -> EntrySealedCommitted;
    list(ListContext) -> EntryFilteringCursor;
    search(SearchContext) -> EntryFilteringCursor;
    compare(CompareContext) -> bool;
    bind(BindContext) -> ();
    unbind(UnbindContext) -> ();
}

/// The stages in the order every operation meets them.
pub fn default_chain() -> Vec<Box<dyn Interceptor>> {
    vec![
        Box::new(normalization::NormalizationInterceptor),
        Box::new(authentication::AuthenticationInterceptor),
        Box::new(aci::AciAuthorizationInterceptor),
        Box::new(default_authz::DefaultAuthorizationInterceptor),
        Box::new(exception::ExceptionInterceptor),
        Box::new(operational::OperationalAttributeInterceptor),
        Box::new(schema::SchemaInterceptor),
        Box::new(subentry::SubentryInterceptor),
        Box::new(collective::CollectiveAttributeInterceptor),
        Box::new(event::EventInterceptor),
        Box::new(trigger::TriggerInterceptor),
        Box::new(changelog::ChangeLogInterceptor),
        Box::new(journal::JournalInterceptor),
    ]
}

/// Fetch an entry for a stage's own use. The lookup runs through the chain as the
/// internal identity and skips every stage that would check or decorate the result.
pub(crate) fn lookup_for_access(
    next: &NextInterceptor<'_>,
    common: &OperationCommon,
    dn: &Dn,
) -> Result<Arc<EntrySealedCommitted>, OperationError> {
    let mut ctx = LookupContext::new(
        common.nested(Bypass::ACCESS_LOOKUP),
        dn.clone(),
        AttributeSelection::everything(),
    );
    next.core().lookup(&mut ctx).map(Arc::new)
}
