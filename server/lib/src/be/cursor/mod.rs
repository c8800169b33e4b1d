//! Cursors are stateful, repositionable iterators. Searches build a tree of cursors
//! over the indexes of a partition, so candidates stream out one at a time rather than
//! being materialised up front.
//!
//! A cursor starts positioned before its first element. `next` and `previous` move it
//! and report whether it now sits on an element, which `get` then returns. Calling
//! `get` when `available` is false is an error, as is any use after `close`.

use crate::prelude::*;

pub mod boolean;
pub mod index;
pub mod monitor;
pub mod scope;

pub use self::monitor::{ClosureMonitor, DefaultClosureMonitor, TimeLimitMonitor};

pub trait Cursor: Send {
    type Item;

    fn before_first(&mut self) -> Result<(), OperationError>;

    fn after_last(&mut self) -> Result<(), OperationError>;

    fn first(&mut self) -> Result<bool, OperationError> {
        self.before_first()?;
        self.next()
    }

    fn last(&mut self) -> Result<bool, OperationError> {
        self.after_last()?;
        self.previous()
    }

    fn next(&mut self) -> Result<bool, OperationError>;

    fn previous(&mut self) -> Result<bool, OperationError>;

    fn available(&self) -> bool;

    fn get(&self) -> Result<Self::Item, OperationError>;

    /// Position just before `element`, so the following `next` lands on it or on the
    /// first element after it. Only cursors over ordered keys support this.
    fn before(&mut self, _element: &Self::Item) -> Result<(), OperationError> {
        Err(OperationError::UnsupportedOperation)
    }

    /// Position just after `element`.
    fn after(&mut self, _element: &Self::Item) -> Result<(), OperationError> {
        Err(OperationError::UnsupportedOperation)
    }

    /// Closing is idempotent.
    fn close(&mut self);

    fn close_with(&mut self, _cause: OperationError) {
        self.close()
    }

    fn is_closed(&self) -> bool;

    /// Read every remaining element from the start.
    fn collect_all(&mut self) -> Result<Vec<Self::Item>, OperationError> {
        let mut out = Vec::new();
        self.before_first()?;
        while self.next()? {
            out.push(self.get()?);
        }
        Ok(out)
    }
}

pub type IdCursor = Box<dyn Cursor<Item = u64>>;

impl<C: Cursor + ?Sized> Cursor for Box<C> {
    type Item = C::Item;

    fn before_first(&mut self) -> Result<(), OperationError> {
        (**self).before_first()
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        (**self).after_last()
    }

    fn first(&mut self) -> Result<bool, OperationError> {
        (**self).first()
    }

    fn last(&mut self) -> Result<bool, OperationError> {
        (**self).last()
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        (**self).next()
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        (**self).previous()
    }

    fn available(&self) -> bool {
        (**self).available()
    }

    fn get(&self) -> Result<Self::Item, OperationError> {
        (**self).get()
    }

    fn before(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        (**self).before(element)
    }

    fn after(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        (**self).after(element)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn close_with(&mut self, cause: OperationError) {
        (**self).close_with(cause)
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

/// A cursor over an owned list. It has no ordered key, so it only walks.
pub struct ListCursor<T> {
    items: Vec<T>,
    // -1 is before first, len is after last.
    pos: isize,
    monitor: DefaultClosureMonitor,
}

impl<T> ListCursor<T> {
    pub fn new(items: Vec<T>) -> Self {
        ListCursor {
            items,
            pos: -1,
            monitor: DefaultClosureMonitor::default(),
        }
    }

    pub fn empty() -> Self {
        ListCursor::new(Vec::new())
    }

    pub fn singleton(item: T) -> Self {
        ListCursor::new(vec![item])
    }

    fn len(&self) -> isize {
        self.items.len() as isize
    }
}

impl<T: Clone + Send> Cursor for ListCursor<T> {
    type Item = T;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.pos = -1;
        Ok(())
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.pos = self.len();
        Ok(())
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.monitor.check_not_closed()?;
        if self.pos < self.len() {
            self.pos += 1;
        }
        Ok(self.available())
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.monitor.check_not_closed()?;
        if self.pos >= 0 {
            self.pos -= 1;
        }
        Ok(self.available())
    }

    fn available(&self) -> bool {
        !self.monitor.is_closed() && self.pos >= 0 && self.pos < self.len()
    }

    fn get(&self) -> Result<T, OperationError> {
        if self.monitor.is_closed() {
            return Err(OperationError::CursorClosed);
        }
        usize::try_from(self.pos)
            .ok()
            .and_then(|p| self.items.get(p))
            .cloned()
            .ok_or(OperationError::InvalidCursorPosition)
    }

    fn close(&mut self) {
        self.monitor.close(None)
    }

    fn close_with(&mut self, cause: OperationError) {
        self.monitor.close(Some(cause))
    }

    fn is_closed(&self) -> bool {
        self.monitor.is_closed()
    }
}
