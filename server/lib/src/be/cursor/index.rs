//! Cursors over the rows of an ordered index.
//!
//! An [`IndexCursor`] does not hold the index lock between calls. It remembers the row
//! it sits on and seeks from there on every move, so writers are never blocked by a
//! slow reader and a reader sees rows added behind its position.

use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use super::{ClosureMonitor, Cursor, DefaultClosureMonitor};
use crate::be::locks::read_lock;
use crate::prelude::*;

/// One row of an index: a key and the id of an entry holding it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexEntry<K> {
    pub key: K,
    pub id: u64,
}

impl<K> IndexEntry<K> {
    pub fn new(key: K, id: u64) -> Self {
        IndexEntry { key, id }
    }
}

pub(crate) type IndexTable<K> = Arc<RwLock<BTreeSet<IndexEntry<K>>>>;

#[derive(Debug, Clone)]
enum Position<K> {
    BeforeFirst,
    AfterLast,
    On(IndexEntry<K>),
    Before(IndexEntry<K>),
    After(IndexEntry<K>),
}

fn tighter_lower<'a, T: Ord>(a: Bound<&'a T>, b: Bound<&'a T>) -> Bound<&'a T> {
    match (a, b) {
        (Bound::Unbounded, x) | (x, Bound::Unbounded) => x,
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.max(y)),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.max(y)),
        (Bound::Included(x), Bound::Excluded(y)) | (Bound::Excluded(y), Bound::Included(x)) => {
            if x > y {
                Bound::Included(x)
            } else {
                Bound::Excluded(y)
            }
        }
    }
}

fn tighter_upper<'a, T: Ord>(a: Bound<&'a T>, b: Bound<&'a T>) -> Bound<&'a T> {
    match (a, b) {
        (Bound::Unbounded, x) | (x, Bound::Unbounded) => x,
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.min(y)),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.min(y)),
        (Bound::Included(x), Bound::Excluded(y)) | (Bound::Excluded(y), Bound::Included(x)) => {
            if x < y {
                Bound::Included(x)
            } else {
                Bound::Excluded(y)
            }
        }
    }
}

// BTreeSet::range panics on an inverted range, so check first.
fn range_is_valid<T: Ord>(lower: Bound<&T>, upper: Bound<&T>) -> bool {
    match (lower, upper) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => true,
        (Bound::Included(l), Bound::Included(u)) => l <= u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l < u,
    }
}

pub struct IndexCursor<K> {
    table: IndexTable<K>,
    lower: Bound<IndexEntry<K>>,
    upper: Bound<IndexEntry<K>>,
    pos: Position<K>,
    monitor: DefaultClosureMonitor,
}

impl<K: Ord + Clone + Send + Sync> IndexCursor<K> {
    pub(crate) fn new(
        table: IndexTable<K>,
        lower: Bound<IndexEntry<K>>,
        upper: Bound<IndexEntry<K>>,
    ) -> Self {
        IndexCursor {
            table,
            lower,
            upper,
            pos: Position::BeforeFirst,
            monitor: DefaultClosureMonitor::default(),
        }
    }

    /// Every row of the index.
    pub(crate) fn all(table: IndexTable<K>) -> Self {
        Self::new(table, Bound::Unbounded, Bound::Unbounded)
    }

    /// The rows of one key.
    pub(crate) fn key(table: IndexTable<K>, key: K) -> Self {
        Self::new(
            table,
            Bound::Included(IndexEntry::new(key.clone(), 0)),
            Bound::Included(IndexEntry::new(key, u64::MAX)),
        )
    }

    /// The rows with keys inside the bounds.
    pub(crate) fn range(table: IndexTable<K>, lower: Bound<K>, upper: Bound<K>) -> Self {
        let lower = match lower {
            Bound::Included(k) => Bound::Included(IndexEntry::new(k, 0)),
            Bound::Excluded(k) => Bound::Excluded(IndexEntry::new(k, u64::MAX)),
            Bound::Unbounded => Bound::Unbounded,
        };
        let upper = match upper {
            Bound::Included(k) => Bound::Included(IndexEntry::new(k, u64::MAX)),
            Bound::Excluded(k) => Bound::Excluded(IndexEntry::new(k, 0)),
            Bound::Unbounded => Bound::Unbounded,
        };
        Self::new(table, lower, upper)
    }

    /// Position before the first row holding `key`.
    pub fn before_key(&mut self, key: K) -> Result<(), OperationError> {
        self.before(&IndexEntry::new(key, 0))
    }

    /// Position after the last row holding `key`.
    pub fn after_key(&mut self, key: K) -> Result<(), OperationError> {
        self.after(&IndexEntry::new(key, u64::MAX))
    }

    fn seek_forward(&self, from: Bound<&IndexEntry<K>>) -> Option<IndexEntry<K>> {
        let lower = tighter_lower(from, self.lower.as_ref());
        let upper = self.upper.as_ref();
        if !range_is_valid(lower, upper) {
            return None;
        }
        read_lock(&self.table).range((lower, upper)).next().cloned()
    }

    fn seek_backward(&self, from: Bound<&IndexEntry<K>>) -> Option<IndexEntry<K>> {
        let lower = self.lower.as_ref();
        let upper = tighter_upper(from, self.upper.as_ref());
        if !range_is_valid(lower, upper) {
            return None;
        }
        read_lock(&self.table)
            .range((lower, upper))
            .next_back()
            .cloned()
    }
}

impl<K: Ord + Clone + Send + Sync> Cursor for IndexCursor<K> {
    type Item = IndexEntry<K>;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.pos = Position::BeforeFirst;
        Ok(())
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.pos = Position::AfterLast;
        Ok(())
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.monitor.check_not_closed()?;
        let found = match &self.pos {
            Position::AfterLast => None,
            Position::BeforeFirst => self.seek_forward(Bound::Unbounded),
            Position::On(e) | Position::After(e) => self.seek_forward(Bound::Excluded(e)),
            Position::Before(e) => self.seek_forward(Bound::Included(e)),
        };
        self.pos = match found {
            Some(e) => Position::On(e),
            None => Position::AfterLast,
        };
        Ok(self.available())
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.monitor.check_not_closed()?;
        let found = match &self.pos {
            Position::BeforeFirst => None,
            Position::AfterLast => self.seek_backward(Bound::Unbounded),
            Position::On(e) | Position::Before(e) => self.seek_backward(Bound::Excluded(e)),
            Position::After(e) => self.seek_backward(Bound::Included(e)),
        };
        self.pos = match found {
            Some(e) => Position::On(e),
            None => Position::BeforeFirst,
        };
        Ok(self.available())
    }

    fn available(&self) -> bool {
        !self.monitor.is_closed() && matches!(self.pos, Position::On(_))
    }

    fn get(&self) -> Result<IndexEntry<K>, OperationError> {
        if self.monitor.is_closed() {
            return Err(OperationError::CursorClosed);
        }
        match &self.pos {
            Position::On(e) => Ok(e.clone()),
            _ => Err(OperationError::InvalidCursorPosition),
        }
    }

    fn before(&mut self, element: &IndexEntry<K>) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.pos = Position::Before(element.clone());
        Ok(())
    }

    fn after(&mut self, element: &IndexEntry<K>) -> Result<(), OperationError> {
        self.monitor.check_not_closed()?;
        self.pos = Position::After(element.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.monitor.close(None)
    }

    fn is_closed(&self) -> bool {
        self.monitor.is_closed()
    }
}

/// The entry ids of an index cursor's rows, in row order.
pub struct IndexIdCursor<K> {
    inner: IndexCursor<K>,
}

impl<K> IndexIdCursor<K> {
    pub fn new(inner: IndexCursor<K>) -> Self {
        IndexIdCursor { inner }
    }
}

impl<K: Ord + Clone + Send + Sync> Cursor for IndexIdCursor<K> {
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
        self.inner.get().map(|e| e.id)
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::{IndexCursor, IndexEntry, IndexTable};
    use crate::be::cursor::Cursor;
    use crate::prelude::*;
    use std::collections::BTreeSet;
    use std::ops::Bound;
    use std::sync::RwLock;

    fn table(rows: &[(&str, u64)]) -> IndexTable<String> {
        Arc::new(RwLock::new(
            rows.iter()
                .map(|(k, id)| IndexEntry::new(k.to_string(), *id))
                .collect::<BTreeSet<_>>(),
        ))
    }

    #[test]
    fn test_index_cursor_key_scan() {
        let t = table(&[("a", 3), ("b", 1), ("b", 7), ("c", 2)]);
        let mut c = IndexCursor::key(t, "b".to_string());
        let ids: Vec<u64> = c.collect_all().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 7]);
        assert!(c.last().unwrap());
        assert_eq!(c.get().unwrap().id, 7);
        assert!(c.previous().unwrap());
        assert!(!c.previous().unwrap());
        assert_eq!(c.get(), Err(OperationError::InvalidCursorPosition));
    }

    #[test]
    fn test_index_cursor_range_and_positioning() {
        let t = table(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        let mut c = IndexCursor::range(
            t.clone(),
            Bound::Excluded("a".to_string()),
            Bound::Included("c".to_string()),
        );
        let keys: Vec<String> = c.collect_all().unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);

        let mut c = IndexCursor::all(t.clone());
        c.before_key("c".to_string()).unwrap();
        assert!(!c.available());
        assert!(c.next().unwrap());
        assert_eq!(c.get().unwrap().key, "c");
        c.after_key("c".to_string()).unwrap();
        assert!(c.next().unwrap());
        assert_eq!(c.get().unwrap().key, "d");
        c.after_key("b".to_string()).unwrap();
        assert!(c.previous().unwrap());
        assert_eq!(c.get().unwrap().key, "b");

        // Positioning outside of the bounds stays inside them.
        let mut c = IndexCursor::key(t.clone(), "b".to_string());
        c.before_key("a".to_string()).unwrap();
        assert!(c.next().unwrap());
        assert_eq!(c.get().unwrap().key, "b");
        c.after_key("z".to_string()).unwrap();
        assert!(!c.next().unwrap());

        // Rows written behind the position are seen.
        let mut c = IndexCursor::all(t.clone());
        assert!(c.next().unwrap());
        t.write().unwrap().insert(IndexEntry::new("aa".to_string(), 9));
        assert!(c.next().unwrap());
        assert_eq!(c.get().unwrap().key, "aa");
    }

    #[test]
    fn test_index_cursor_empty_and_inverted_ranges() {
        let t = table(&[("a", 1)]);
        let mut c = IndexCursor::range(
            t,
            Bound::Included("z".to_string()),
            Bound::Excluded("b".to_string()),
        );
        assert!(!c.first().unwrap());
        assert!(!c.last().unwrap());
        c.close();
        assert_eq!(c.next(), Err(OperationError::CursorClosed));
    }
}
