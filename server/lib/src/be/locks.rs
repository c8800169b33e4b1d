//! Striped per entry locks, and lock helpers that survive poisoning.
//!
//! A mutation holds the stripes of every entry id it touches. Stripes are always taken
//! in ascending order so two mutations can not deadlock.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn read_lock<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write_lock<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn mutex_lock<T>(l: &Mutex<T>) -> MutexGuard<'_, T> {
    l.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct EntryLocks {
    stripes: Vec<Mutex<()>>,
}

/// The held stripes. Released on drop.
pub struct EntryLockGuard<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
    stripes: Vec<usize>,
}

impl EntryLockGuard<'_> {
    pub fn stripes(&self) -> &[usize] {
        &self.stripes
    }
}

impl EntryLocks {
    pub fn new(stripes: usize) -> Self {
        EntryLocks {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn stripe_of(&self, id: u64) -> usize {
        (id % self.stripes.len() as u64) as usize
    }

    /// Lock the stripes of all of the given ids.
    pub fn lock(&self, ids: &[u64]) -> EntryLockGuard<'_> {
        let stripes: BTreeSet<usize> = ids.iter().map(|id| self.stripe_of(*id)).collect();
        let stripes: Vec<usize> = stripes.into_iter().collect();
        let guards = stripes
            .iter()
            .filter_map(|s| self.stripes.get(*s))
            .map(mutex_lock)
            .collect();
        EntryLockGuard {
            _guards: guards,
            stripes,
        }
    }
}
