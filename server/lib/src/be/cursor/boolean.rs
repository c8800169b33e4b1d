//! Cursors combining other cursors and evaluators.
//!
//! An [`AndCursor`] walks the cheapest candidate cursor and checks each id against the
//! evaluators of the remaining components. An [`OrCursor`] walks its children in turn,
//! skipping ids an earlier child already produced, which it detects with that child's
//! evaluator so no id set is built. A [`NotCursor`] walks a universe and keeps the ids
//! the negated component accepts.

use super::{ClosureMonitor, Cursor, DefaultClosureMonitor, IdCursor};
use crate::be::evaluator::Evaluator;
use crate::be::BTreePartition;
use crate::filter::FilterResolved;
use crate::prelude::*;

pub struct AndCursor {
    partition: BTreePartition,
    candidate: IdCursor,
    evaluators: Vec<Evaluator>,
    monitor: DefaultClosureMonitor,
}

impl AndCursor {
    pub fn new(partition: BTreePartition, candidate: IdCursor, evaluators: Vec<Evaluator>) -> Self {
        AndCursor {
            partition,
            candidate,
            evaluators,
            monitor: DefaultClosureMonitor::default(),
        }
    }

    fn matches(&self, id: u64) -> bool {
        self.evaluators
            .iter()
            .all(|e| e.evaluate(&self.partition, id))
    }
}

impl Cursor for AndCursor {
    type Item = u64;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.candidate.before_first()
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.candidate.after_last()
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.monitor.check_not_closed()?;
        while self.candidate.next()? {
            if self.matches(self.candidate.get()?) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.monitor.check_not_closed()?;
        while self.candidate.previous()? {
            if self.matches(self.candidate.get()?) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn available(&self) -> bool {
        !self.monitor.is_closed() && self.candidate.available()
    }

    fn get(&self) -> Result<u64, OperationError> {
        if self.monitor.is_closed() {
            return Err(OperationError::CursorClosed);
        }
        self.candidate.get()
    }

    fn close(&mut self) {
        self.monitor.close(None);
        self.candidate.close();
    }

    fn is_closed(&self) -> bool {
        self.monitor.is_closed()
    }
}

pub struct OrCursor {
    partition: BTreePartition,
    children: Vec<IdCursor>,
    // One per child, accepting exactly the ids that child yields.
    evaluators: Vec<Evaluator>,
    // The child being walked. Equal to the child count once past the last.
    pos: usize,
    monitor: DefaultClosureMonitor,
}

impl OrCursor {
    pub fn new(partition: BTreePartition, children: Vec<(IdCursor, Evaluator)>) -> Self {
        let (children, evaluators) = children.into_iter().unzip();
        OrCursor {
            partition,
            children,
            evaluators,
            pos: 0,
            monitor: DefaultClosureMonitor::default(),
        }
    }

    // Produced by an earlier child already.
    fn seen_before(&self, id: u64) -> bool {
        self.evaluators
            .iter()
            .take(self.pos)
            .any(|e| e.evaluate(&self.partition, id))
    }
}

impl Cursor for OrCursor {
    type Item = u64;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.pos = 0;
        if let Some(c) = self.children.first_mut() {
            c.before_first()?;
        }
        Ok(())
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.pos = self.children.len();
        Ok(())
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.monitor.check_not_closed()?;
        while let Some(child) = self.children.get_mut(self.pos) {
            if child.next()? {
                let id = child.get()?;
                if !self.seen_before(id) {
                    return Ok(true);
                }
            } else {
                self.pos += 1;
                if let Some(c) = self.children.get_mut(self.pos) {
                    c.before_first()?;
                }
            }
        }
        Ok(false)
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.monitor.check_not_closed()?;
        if self.children.is_empty() {
            return Ok(false);
        }
        if self.pos >= self.children.len() {
            self.pos = self.children.len() - 1;
            if let Some(c) = self.children.get_mut(self.pos) {
                c.after_last()?;
            }
        }
        loop {
            let Some(child) = self.children.get_mut(self.pos) else {
                return Ok(false);
            };
            if child.previous()? {
                let id = child.get()?;
                if !self.seen_before(id) {
                    return Ok(true);
                }
            } else if self.pos == 0 {
                return Ok(false);
            } else {
                self.pos -= 1;
                if let Some(c) = self.children.get_mut(self.pos) {
                    c.after_last()?;
                }
            }
        }
    }

    fn available(&self) -> bool {
        !self.monitor.is_closed()
            && self
                .children
                .get(self.pos)
                .map(|c| c.available())
                .unwrap_or(false)
    }

    fn get(&self) -> Result<u64, OperationError> {
        if self.monitor.is_closed() {
            return Err(OperationError::CursorClosed);
        }
        self.children
            .get(self.pos)
            .ok_or(OperationError::InvalidCursorPosition)?
            .get()
    }

    fn close(&mut self) {
        self.monitor.close(None);
        for c in self.children.iter_mut() {
            c.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.monitor.is_closed()
    }
}

pub struct NotCursor {
    inner: AndCursor,
}

impl NotCursor {
    /// Walk `universe` keeping the ids that `positive` does not match. An id for which
    /// `positive` is undefined is not kept either.
    pub fn new(partition: BTreePartition, universe: IdCursor, positive: FilterResolved) -> Self {
        let negated = Evaluator::Filter(FilterResolved::Not(Box::new(positive)));
        NotCursor {
            inner: AndCursor::new(partition, universe, vec![negated]),
        }
    }
}

impl Cursor for NotCursor {
    type Item = u64;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.inner.before_first()
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.inner.after_last()
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.inner.next()
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.inner.previous()
    }

    fn available(&self) -> bool {
        self.inner.available()
    }

    fn get(&self) -> Result<u64, OperationError> {
        self.inner.get()
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
