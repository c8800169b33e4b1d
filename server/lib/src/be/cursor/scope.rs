//! The scope cursor yields the ids of a one level or subtree search scope.
//!
//! Without dereferencing this is a walk over the one level or sub level index. When
//! aliases are dereferenced while searching, the aliases in scope are skipped and,
//! once the primary walk is done, the cursor continues over what the aliases point at:
//! the targets themselves for a one level scope, or the subtrees below the targets for
//! a subtree scope. An id reached more than one way is yielded once.

use std::collections::BTreeSet;

use super::{ClosureMonitor, Cursor, DefaultClosureMonitor, IdCursor, ListCursor};
use crate::be::BTreePartition;
use crate::event::SearchScope;
use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeState {
    ScanningPrimary,
    ScanningDereferenced,
    Exhausted,
}

pub struct ScopeCursor {
    partition: BTreePartition,
    base: u64,
    scope: SearchScope,
    deref: bool,
    primary: IdCursor,
    dereferenced: Option<ListCursor<u64>>,
    state: ScopeState,
    monitor: DefaultClosureMonitor,
}

impl ScopeCursor {
    pub fn new(partition: BTreePartition, base: u64, scope: SearchScope, deref: bool) -> Self {
        let primary = match scope {
            SearchScope::Base => Box::new(ListCursor::singleton(base)) as IdCursor,
            SearchScope::OneLevel => partition.children_cursor(base),
            SearchScope::Subtree => partition.subtree_cursor(base),
        };
        ScopeCursor {
            partition,
            base,
            scope,
            deref,
            primary,
            dereferenced: None,
            state: ScopeState::ScanningPrimary,
            monitor: DefaultClosureMonitor::default(),
        }
    }

    /// The ids reached only through aliases, built on first use.
    fn dereferenced_ids(&self) -> Vec<u64> {
        let p = &self.partition;
        match self.scope {
            SearchScope::Base => Vec::new(),
            SearchScope::OneLevel => p
                .one_alias_targets(self.base)
                .into_iter()
                .filter(|t| p.fetch(*t).is_some())
                .filter(|t| p.parent_of(*t) != Some(self.base))
                .collect(),
            SearchScope::Subtree => {
                let mut seen = BTreeSet::new();
                let mut out = Vec::new();
                for target in p.sub_alias_targets(self.base) {
                    for id in p.subtree_ids(target) {
                        if p.in_subtree(self.base, id) || p.is_alias_id(id) || !seen.insert(id) {
                            continue;
                        }
                        out.push(id);
                    }
                }
                out
            }
        }
    }

    fn dereferenced(&mut self) -> &mut ListCursor<u64> {
        if self.dereferenced.is_none() {
            let ids = self.dereferenced_ids();
            filter_trace!(base = self.base, count = ids.len(), "dereferenced alias targets");
            self.dereferenced = Some(ListCursor::new(ids));
        }
        self.dereferenced.get_or_insert_with(ListCursor::empty)
    }

    fn skip(&self, id: u64) -> bool {
        self.deref && self.partition.is_alias_id(id)
    }
}

impl Cursor for ScopeCursor {
    type Item = u64;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.primary.before_first()?;
        self.state = ScopeState::ScanningPrimary;
        Ok(())
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.state = ScopeState::Exhausted;
        Ok(())
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.monitor.check_not_closed()?;
        loop {
            match self.state {
                ScopeState::ScanningPrimary => {
                    if self.primary.next()? {
                        let id = self.primary.get()?;
                        if self.skip(id) {
                            continue;
                        }
                        return Ok(true);
                    } else if self.deref {
                        self.dereferenced().before_first()?;
                        self.state = ScopeState::ScanningDereferenced;
                    } else {
                        self.state = ScopeState::Exhausted;
                        return Ok(false);
                    }
                }
                ScopeState::ScanningDereferenced => {
                    if self.dereferenced().next()? {
                        return Ok(true);
                    }
                    self.state = ScopeState::Exhausted;
                    return Ok(false);
                }
                ScopeState::Exhausted => return Ok(false),
            }
        }
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.monitor.check_not_closed()?;
        loop {
            match self.state {
                ScopeState::Exhausted => {
                    if self.deref {
                        self.dereferenced().after_last()?;
                        self.state = ScopeState::ScanningDereferenced;
                    } else {
                        self.primary.after_last()?;
                        self.state = ScopeState::ScanningPrimary;
                    }
                }
                ScopeState::ScanningDereferenced => {
                    if self.dereferenced().previous()? {
                        return Ok(true);
                    }
                    self.primary.after_last()?;
                    self.state = ScopeState::ScanningPrimary;
                }
                ScopeState::ScanningPrimary => {
                    if !self.primary.previous()? {
                        return Ok(false);
                    }
                    let id = self.primary.get()?;
                    if !self.skip(id) {
                        return Ok(true);
                    }
                }
            }
        }
    }

    fn available(&self) -> bool {
        if self.monitor.is_closed() {
            return false;
        }
        match self.state {
            ScopeState::ScanningPrimary => self.primary.available(),
            ScopeState::ScanningDereferenced => self
                .dereferenced
                .as_ref()
                .map(|d| d.available())
                .unwrap_or(false),
            ScopeState::Exhausted => false,
        }
    }

    fn get(&self) -> Result<u64, OperationError> {
        if self.monitor.is_closed() {
            return Err(OperationError::CursorClosed);
        }
        match self.state {
            ScopeState::ScanningPrimary => self.primary.get(),
            ScopeState::ScanningDereferenced => self
                .dereferenced
                .as_ref()
                .ok_or(OperationError::InvalidCursorPosition)?
                .get(),
            ScopeState::Exhausted => Err(OperationError::InvalidCursorPosition),
        }
    }

    fn close(&mut self) {
        self.monitor.close(None);
        self.primary.close();
        if let Some(d) = self.dereferenced.as_mut() {
            d.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.monitor.is_closed()
    }
}
