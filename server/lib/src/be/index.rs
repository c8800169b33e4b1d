//! The index SPI and its in-memory B-tree implementation.
//!
//! Every index is a forward table of `(key, id)` rows and a reverse table from id to
//! the keys it is held under. The partition keeps one index per structural relation
//! and one equality index per indexed attribute type.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::RwLock;

use crate::be::cursor::index::{IndexCursor, IndexEntry, IndexTable};
use crate::be::locks::{read_lock, write_lock};
use crate::prelude::*;

pub trait Index<K> {
    fn name(&self) -> &str;

    /// Returns false if the row was already present.
    fn add(&self, key: K, id: u64) -> bool;

    /// Returns false if the row was absent.
    fn drop(&self, key: &K, id: u64) -> bool;

    /// Remove every row of an id, returning the keys it was held under.
    fn drop_id(&self, id: u64) -> BTreeSet<K>;

    /// The first id held under a key.
    fn forward_lookup(&self, key: &K) -> Option<u64>;

    /// The keys an id is held under.
    fn reverse_lookup(&self, id: u64) -> BTreeSet<K>;

    fn forward(&self, key: &K, id: u64) -> bool;

    fn forward_cursor(&self) -> IndexCursor<K>;

    fn forward_cursor_key(&self, key: K) -> IndexCursor<K>;

    fn forward_cursor_range(&self, lower: Bound<K>, upper: Bound<K>) -> IndexCursor<K>;

    /// The rows of an id, ordered by key.
    fn reverse_cursor(&self, id: u64) -> IndexCursor<K>;

    /// The number of rows.
    fn count(&self) -> usize;

    /// The number of rows of one key.
    fn count_key(&self, key: &K) -> usize;
}

pub struct BTreeIndex<K> {
    name: AttrString,
    forward: IndexTable<K>,
    reverse: RwLock<BTreeMap<u64, BTreeSet<K>>>,
}

impl<K: Ord + Clone + Send + Sync> BTreeIndex<K> {
    pub fn new(name: &str) -> Self {
        BTreeIndex {
            name: name.into(),
            forward: Arc::new(RwLock::new(BTreeSet::new())),
            reverse: RwLock::new(BTreeMap::new()),
        }
    }

    /// Every id with at least one row, ascending.
    pub fn ids(&self) -> BTreeSet<u64> {
        read_lock(&self.reverse).keys().copied().collect()
    }

    /// Every row, in key order.
    pub fn rows(&self) -> Vec<IndexEntry<K>> {
        read_lock(&self.forward).iter().cloned().collect()
    }

    /// The ids held under a key, ascending.
    pub fn ids_for_key(&self, key: &K) -> BTreeSet<u64> {
        let lower = IndexEntry::new(key.clone(), 0);
        let upper = IndexEntry::new(key.clone(), u64::MAX);
        read_lock(&self.forward)
            .range(lower..=upper)
            .map(|e| e.id)
            .collect()
    }

    /// The distinct ids held under keys within a range. The lower bound must not be
    /// above the upper one.
    pub fn ids_in_range(&self, lower: Bound<&K>, upper: Bound<&K>) -> BTreeSet<u64> {
        let lower = match lower {
            Bound::Included(k) => Bound::Included(IndexEntry::new(k.clone(), 0)),
            Bound::Excluded(k) => Bound::Excluded(IndexEntry::new(k.clone(), u64::MAX)),
            Bound::Unbounded => Bound::Unbounded,
        };
        let upper = match upper {
            Bound::Included(k) => Bound::Included(IndexEntry::new(k.clone(), u64::MAX)),
            Bound::Excluded(k) => Bound::Excluded(IndexEntry::new(k.clone(), 0)),
            Bound::Unbounded => Bound::Unbounded,
        };
        read_lock(&self.forward)
            .range((lower, upper))
            .map(|e| e.id)
            .collect()
    }

    /// The number of rows with keys from `lower` up to but excluding `upper`.
    pub fn count_range(&self, lower: &K, upper: &K) -> usize {
        if lower >= upper {
            return 0;
        }
        let lower = IndexEntry::new(lower.clone(), 0);
        let upper = IndexEntry::new(upper.clone(), 0);
        read_lock(&self.forward).range(lower..upper).count()
    }
}

impl<K: Ord + Clone + Send + Sync> Index<K> for BTreeIndex<K> {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn add(&self, key: K, id: u64) -> bool {
        let mut fwd = write_lock(&self.forward);
        let mut rev = write_lock(&self.reverse);
        rev.entry(id).or_default().insert(key.clone());
        fwd.insert(IndexEntry::new(key, id))
    }

    fn drop(&self, key: &K, id: u64) -> bool {
        let mut fwd = write_lock(&self.forward);
        let mut rev = write_lock(&self.reverse);
        if let Some(keys) = rev.get_mut(&id) {
            keys.remove(key);
            if keys.is_empty() {
                rev.remove(&id);
            }
        }
        fwd.remove(&IndexEntry::new(key.clone(), id))
    }

    fn drop_id(&self, id: u64) -> BTreeSet<K> {
        let mut fwd = write_lock(&self.forward);
        let mut rev = write_lock(&self.reverse);
        let keys = rev.remove(&id).unwrap_or_default();
        for k in keys.iter() {
            fwd.remove(&IndexEntry::new(k.clone(), id));
        }
        keys
    }

    fn forward_lookup(&self, key: &K) -> Option<u64> {
        let lower = IndexEntry::new(key.clone(), 0);
        let upper = IndexEntry::new(key.clone(), u64::MAX);
        read_lock(&self.forward)
            .range(lower..=upper)
            .next()
            .map(|e| e.id)
    }

    fn reverse_lookup(&self, id: u64) -> BTreeSet<K> {
        read_lock(&self.reverse)
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    fn forward(&self, key: &K, id: u64) -> bool {
        read_lock(&self.forward).contains(&IndexEntry::new(key.clone(), id))
    }

    fn forward_cursor(&self) -> IndexCursor<K> {
        IndexCursor::all(self.forward.clone())
    }

    fn forward_cursor_key(&self, key: K) -> IndexCursor<K> {
        IndexCursor::key(self.forward.clone(), key)
    }

    fn forward_cursor_range(&self, lower: Bound<K>, upper: Bound<K>) -> IndexCursor<K> {
        IndexCursor::range(self.forward.clone(), lower, upper)
    }

    fn reverse_cursor(&self, id: u64) -> IndexCursor<K> {
        // The reverse table is small per id, so serve it from a private table.
        let rows: BTreeSet<IndexEntry<K>> = self
            .reverse_lookup(id)
            .into_iter()
            .map(|k| IndexEntry::new(k, id))
            .collect();
        IndexCursor::all(Arc::new(RwLock::new(rows)))
    }

    fn count(&self) -> usize {
        read_lock(&self.forward).len()
    }

    fn count_key(&self, key: &K) -> usize {
        let lower = IndexEntry::new(key.clone(), 0);
        let upper = IndexEntry::new(key.clone(), u64::MAX);
        read_lock(&self.forward).range(lower..=upper).count()
    }
}
