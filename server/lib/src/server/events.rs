//! Change notification. Listeners register interest in a region of the tree, a filter
//! and a set of operation kinds, and are told about every matching mutation once it
//! has been applied.

use std::sync::atomic::{AtomicU64, Ordering};

use concread::cowcell::CowCell;

use crate::event::{OperationKind, SearchScope};
use crate::prelude::*;

bitflags::bitflags! {
    /// The mutations a listener is told about.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct EventMask: u8 {
        const ADD =             0b0000_0001;
        const DELETE =          0b0000_0010;
        const MODIFY =          0b0000_0100;
        const RENAME =          0b0000_1000;
        const MOVE =            0b0001_0000;
        const MOVE_AND_RENAME = 0b0010_0000;
        const ALL = Self::ADD.bits()
            | Self::DELETE.bits()
            | Self::MODIFY.bits()
            | Self::RENAME.bits()
            | Self::MOVE.bits()
            | Self::MOVE_AND_RENAME.bits();
    }
}

impl EventMask {
    pub fn of(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Add => EventMask::ADD,
            OperationKind::Delete => EventMask::DELETE,
            OperationKind::Modify => EventMask::MODIFY,
            OperationKind::Rename => EventMask::RENAME,
            OperationKind::Move => EventMask::MOVE,
            OperationKind::MoveAndRename => EventMask::MOVE_AND_RENAME,
            _ => EventMask::empty(),
        }
    }
}

/// An applied mutation.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    pub kind: OperationKind,
    pub dn: Dn,
    /// The new name of a renamed or moved entry.
    pub new_dn: Option<Dn>,
    /// The entry before the change, absent for adds.
    pub before: Option<Arc<EntrySealedCommitted>>,
    /// The entry after the change, absent for deletes.
    pub after: Option<Arc<EntrySealedCommitted>>,
    pub principal: String,
}

impl ChangeNotification {
    /// The entry a listener's filter is evaluated against.
    pub fn entry(&self) -> Option<&EntrySealedCommitted> {
        self.after.as_deref().or(self.before.as_deref())
    }
}

pub trait DirectoryListener: Send + Sync {
    fn notify(&self, change: &ChangeNotification);
}

/// Which changes a listener receives.
#[derive(Debug, Clone)]
pub struct NotificationCriteria {
    pub base: Dn,
    pub scope: SearchScope,
    pub filter: Filter<FilterValid>,
    pub mask: EventMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    criteria: NotificationCriteria,
    listener: Arc<dyn DirectoryListener>,
}

fn in_scope(base: &Dn, scope: SearchScope, dn: &Dn) -> bool {
    match scope {
        SearchScope::Base => dn == base,
        SearchScope::OneLevel => base.is_parent_of(dn),
        SearchScope::Subtree => dn.is_descendant_or_self(base),
    }
}

impl Registration {
    fn matches(&self, change: &ChangeNotification) -> bool {
        let c = &self.criteria;
        if !c.mask.intersects(EventMask::of(change.kind)) {
            return false;
        }
        let placed = in_scope(&c.base, c.scope, &change.dn)
            || change
                .new_dn
                .as_ref()
                .map(|dn| in_scope(&c.base, c.scope, dn))
                .unwrap_or(false);
        placed && change.entry().map(|e| c.filter.matches(e)).unwrap_or(false)
    }
}

pub struct EventService {
    next_id: AtomicU64,
    registrations: CowCell<Vec<Arc<Registration>>>,
}

impl Default for EventService {
    fn default() -> Self {
        Self::new()
    }
}

impl EventService {
    pub fn new() -> Self {
        EventService {
            next_id: AtomicU64::new(0),
            registrations: CowCell::new(Vec::new()),
        }
    }

    pub fn add_listener(
        &self,
        listener: Arc<dyn DirectoryListener>,
        criteria: NotificationCriteria,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        admin_debug!(id = id.0, base = %criteria.base, "listener registered");
        let mut regs_wr = self.registrations.write();
        regs_wr.get_mut().push(Arc::new(Registration {
            id,
            criteria,
            listener,
        }));
        regs_wr.commit();
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut regs_wr = self.registrations.write();
        let regs = regs_wr.get_mut();
        let before = regs.len();
        regs.retain(|r| r.id != id);
        let removed = before != regs.len();
        if removed {
            regs_wr.commit();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `change` to every listener it matches.
    pub fn fire(&self, change: &ChangeNotification) -> usize {
        // Listeners are called outside the read transaction, so they may register others.
        let matched: Vec<Arc<Registration>> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.matches(change))
            .cloned()
            .collect();
        for r in matched.iter() {
            request_trace!(id = r.id.0, kind = %change.kind, dn = %change.dn, "notifying listener");
            r.listener.notify(change);
        }
        matched.len()
    }
}
