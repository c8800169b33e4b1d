//! The backend. This contains the partitions the directory is split into, and the
//! indexes and cursors that searches run over.
//!
//! A partition holds one naming context. Entries live in a master table keyed by an
//! id the partition assigns, and every structural relation is held in its own index:
//!
//! * the RDN index maps `(parent id, rdn)` to an id, resolving names;
//! * the one level index lists the children of each entry in RDN order;
//! * the sub level index lists every entry below (and including) each entry;
//! * the alias indexes record alias targets for dereferencing searches.
//!
//! Indexed attribute types additionally carry an equality and a presence index.
//!
//! A mutation takes the entry lock stripes of every id it touches. Renames and moves
//! rewrite the names of a whole subtree, so they exclude all other structural writes
//! of the partition for their duration. Every index write is recorded in an undo log,
//! so a failed mutation leaves no partial index state behind.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::be::cursor::index::IndexIdCursor;
use crate::be::cursor::IdCursor;
use crate::be::idxkey::{ChildKey, ParentIdAndRdn, ROOT_PARENT_ID};
use crate::be::index::{BTreeIndex, Index};
use crate::be::locks::{read_lock, write_lock, EntryLocks};
use crate::be::search::PartitionSearch;
use crate::config::PartitionConfig;
use crate::event::{DerefAliases, SearchScope};
use crate::filter::FilterValid;
use crate::prelude::*;
use crate::schema::SchemaTransaction;

pub mod cursor;
pub mod evaluator;
pub mod idxkey;
pub mod index;
pub mod locks;
pub mod mirror;
pub mod search;

/// A committed change, as seen by partition listeners.
#[derive(Debug)]
pub enum PartitionChange<'a> {
    Add {
        entry: &'a EntrySealedCommitted,
    },
    Delete {
        entry: &'a EntrySealedCommitted,
    },
    Modify {
        before: &'a EntrySealedCommitted,
        after: &'a EntrySealedCommitted,
        mods: &'a ModifyList<ModifyValid>,
    },
    Relocate {
        before: &'a EntrySealedCommitted,
        after: &'a EntrySealedCommitted,
        delete_old_rdn: bool,
        new_superior: Option<&'a Dn>,
    },
}

/// Subscribes to the changes a partition commits.
pub trait PartitionListener: Send + Sync {
    fn committed(&self, partition: &str, change: &PartitionChange<'_>);
}

/// The storage interface of one naming context. Names given to a partition are
/// normalised and lie within its suffix.
pub trait Partition: Send + Sync {
    fn id(&self) -> &str;

    fn suffix(&self) -> &Dn;

    fn add(&self, entry: Entry<EntryNew>) -> Result<Arc<EntrySealedCommitted>, OperationError>;

    fn delete(&self, dn: &Dn) -> Result<Arc<EntrySealedCommitted>, OperationError>;

    fn modify(
        &self,
        dn: &Dn,
        mods: &ModifyList<ModifyValid>,
    ) -> Result<Arc<EntrySealedCommitted>, OperationError>;

    fn rename(
        &self,
        dn: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
        mods: &ModifyList<ModifyValid>,
    ) -> Result<Arc<EntrySealedCommitted>, OperationError>;

    fn move_entry(
        &self,
        dn: &Dn,
        new_superior: &Dn,
        mods: &ModifyList<ModifyValid>,
    ) -> Result<Arc<EntrySealedCommitted>, OperationError>;

    fn move_and_rename(
        &self,
        dn: &Dn,
        new_superior: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
        mods: &ModifyList<ModifyValid>,
    ) -> Result<Arc<EntrySealedCommitted>, OperationError>;

    fn lookup(&self, id: u64) -> Result<Arc<EntrySealedCommitted>, OperationError>;

    fn lookup_dn(&self, dn: &Dn) -> Result<Arc<EntrySealedCommitted>, OperationError>;

    /// Resolve a name to an id. The error carries the deepest existing ancestor.
    fn dn_to_id(&self, dn: &Dn) -> Result<u64, OperationError>;

    fn has_children(&self, dn: &Dn) -> Result<bool, OperationError>;

    /// The number of immediate subordinates of `dn`.
    fn count_children(&self, dn: &Dn) -> Result<usize, OperationError>;

    fn search(
        &self,
        base: &Dn,
        scope: SearchScope,
        deref: DerefAliases,
        filter: &Filter<FilterValid>,
    ) -> Result<PartitionSearch, OperationError>;

    fn entry_count(&self) -> usize;

    fn verify(&self) -> Vec<Result<(), ConsistencyError>>;

    fn register_listener(&self, listener: Arc<dyn PartitionListener>);
}

/// Inverse index writes, replayed newest first unless the operation commits.
struct UndoLog<'a> {
    ops: Vec<Box<dyn FnOnce() + 'a>>,
    committed: bool,
}

impl<'a> UndoLog<'a> {
    fn new() -> Self {
        UndoLog {
            ops: Vec::new(),
            committed: false,
        }
    }

    fn push<F: FnOnce() + 'a>(&mut self, f: F) {
        self.ops.push(Box::new(f))
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for UndoLog<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if !self.ops.is_empty() {
            admin_warn!(writes = self.ops.len(), "rolling back partial index writes");
        }
        while let Some(op) = self.ops.pop() {
            op();
        }
    }
}

fn idx_add<'a, K: Ord + Clone + Send + Sync + 'a>(
    undo: &mut UndoLog<'a>,
    idx: &'a BTreeIndex<K>,
    key: K,
    id: u64,
) {
    if idx.add(key.clone(), id) {
        undo.push(move || {
            idx.drop(&key, id);
        });
    }
}

fn idx_drop<'a, K: Ord + Clone + Send + Sync + 'a>(
    undo: &mut UndoLog<'a>,
    idx: &'a BTreeIndex<K>,
    key: K,
    id: u64,
) {
    if idx.drop(&key, id) {
        undo.push(move || {
            idx.add(key, id);
        });
    }
}

pub(crate) struct PartitionInner {
    id: String,
    suffix: Dn,
    schema: Schema,
    next_id: AtomicU64,
    master: RwLock<BTreeMap<u64, Arc<EntrySealedCommitted>>>,
    rdn_idx: BTreeIndex<ParentIdAndRdn>,
    one_level_idx: BTreeIndex<ChildKey>,
    sub_level_idx: BTreeIndex<u64>,
    // target id -> alias ids
    alias_idx: BTreeIndex<u64>,
    // parent id -> targets of the aliases directly below it
    one_alias_idx: BTreeIndex<u64>,
    // ancestor id -> targets of the aliases anywhere below it
    sub_alias_idx: BTreeIndex<u64>,
    presence_idx: BTreeIndex<AttrString>,
    // Keyed by attribute OID.
    attr_idx: BTreeMap<AttrString, BTreeIndex<Vec<u8>>>,
    locks: EntryLocks,
    structure: RwLock<()>,
    listeners: RwLock<Vec<Arc<dyn PartitionListener>>>,
}

/// The in memory B-tree partition. Cloning is cheap and shares the same store, which
/// is how cursors keep access to it after a search call returns.
#[derive(Clone)]
pub struct BTreePartition {
    inner: Arc<PartitionInner>,
}

impl BTreePartition {
    pub fn new(config: &PartitionConfig, schema: Schema) -> Result<Self, OperationError> {
        let (suffix, attr_idx) = {
            let schema_ro = schema.read();
            let suffix = Dn::parse(&config.suffix)?.normalized(&schema_ro)?;
            if suffix.is_root() {
                return Err(OperationError::InvalidConfiguration(format!(
                    "partition {} has an empty suffix",
                    config.id
                )));
            }
            let mut attr_idx = BTreeMap::new();
            for name in SYSTEM_INDEXED_ATTRIBUTES
                .iter()
                .copied()
                .chain(config.indexed_attributes.iter().map(|s| s.as_str()))
            {
                let sa = schema_ro.resolve_attribute(name).ok_or_else(|| {
                    admin_error!(partition = %config.id, attr = %name, "unknown indexed attribute");
                    OperationError::InvalidConfiguration(format!(
                        "indexed attribute {} is not defined",
                        name
                    ))
                })?;
                attr_idx
                    .entry(sa.oid.clone())
                    .or_insert_with(|| BTreeIndex::new(sa.name()));
            }
            (suffix, attr_idx)
        };

        admin_info!(
            partition = %config.id,
            suffix = %suffix,
            indexes = attr_idx.len(),
            "creating partition"
        );

        Ok(BTreePartition {
            inner: Arc::new(PartitionInner {
                id: config.id.clone(),
                suffix,
                schema,
                next_id: AtomicU64::new(1),
                master: RwLock::new(BTreeMap::new()),
                rdn_idx: BTreeIndex::new("rdn"),
                one_level_idx: BTreeIndex::new("oneLevel"),
                sub_level_idx: BTreeIndex::new("subLevel"),
                alias_idx: BTreeIndex::new("alias"),
                one_alias_idx: BTreeIndex::new("oneAlias"),
                sub_alias_idx: BTreeIndex::new("subAlias"),
                presence_idx: BTreeIndex::new("presence"),
                attr_idx,
                locks: EntryLocks::new(config.entry_lock_stripes),
                structure: RwLock::new(()),
                listeners: RwLock::new(Vec::new()),
            }),
        })
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub(crate) fn fetch(&self, id: u64) -> Option<Arc<EntrySealedCommitted>> {
        read_lock(&self.inner.master).get(&id).cloned()
    }

    /// Every id of the partition, ascending.
    pub(crate) fn universe_cursor(&self) -> IdCursor {
        match self.suffix_id() {
            Some(sid) => Box::new(IndexIdCursor::new(
                self.inner.sub_level_idx.forward_cursor_key(sid),
            )),
            None => Box::new(crate::be::cursor::ListCursor::<u64>::empty()),
        }
    }

    /// The children of an entry in RDN order.
    pub(crate) fn children_cursor(&self, parent: u64) -> IdCursor {
        Box::new(IndexIdCursor::new(self.inner.one_level_idx.forward_cursor_range(
            Bound::Included(ChildKey::first_of(parent)),
            Bound::Excluded(ChildKey::first_of(parent.saturating_add(1))),
        )))
    }

    /// An entry and everything below it, by id.
    pub(crate) fn subtree_cursor(&self, base: u64) -> IdCursor {
        Box::new(IndexIdCursor::new(
            self.inner.sub_level_idx.forward_cursor_key(base),
        ))
    }

    pub(crate) fn child_count(&self, parent: u64) -> usize {
        self.inner
            .one_level_idx
            .count_range(&ChildKey::first_of(parent), &ChildKey::first_of(parent.saturating_add(1)))
    }

    pub(crate) fn subtree_count(&self, base: u64) -> usize {
        self.inner.sub_level_idx.count_key(&base)
    }

    pub(crate) fn subtree_ids(&self, base: u64) -> BTreeSet<u64> {
        self.inner.sub_level_idx.ids_for_key(&base)
    }

    pub(crate) fn in_subtree(&self, base: u64, id: u64) -> bool {
        self.inner.sub_level_idx.forward(&base, id)
    }

    pub(crate) fn parent_of(&self, id: u64) -> Option<u64> {
        self.inner
            .rdn_idx
            .reverse_lookup(id)
            .into_iter()
            .next()
            .map(|k| k.parent_id())
    }

    pub(crate) fn is_alias_id(&self, id: u64) -> bool {
        !self.inner.alias_idx.reverse_lookup(id).is_empty()
    }

    pub(crate) fn alias_target_of(&self, id: u64) -> Option<u64> {
        self.inner.alias_idx.reverse_lookup(id).into_iter().next()
    }

    /// Targets of the aliases directly below `parent`.
    pub(crate) fn one_alias_targets(&self, parent: u64) -> BTreeSet<u64> {
        self.inner.one_alias_idx.ids_for_key(&parent)
    }

    /// Targets of the aliases anywhere below `base`.
    pub(crate) fn sub_alias_targets(&self, base: u64) -> BTreeSet<u64> {
        self.inner.sub_alias_idx.ids_for_key(&base)
    }

    pub(crate) fn attr_index(&self, oid: &str) -> Option<&BTreeIndex<Vec<u8>>> {
        self.inner.attr_idx.get(oid)
    }

    pub(crate) fn presence_index(&self) -> &BTreeIndex<AttrString> {
        &self.inner.presence_idx
    }

    pub fn is_indexed(&self, oid: &str) -> bool {
        self.inner.attr_idx.contains_key(oid)
    }

    fn suffix_id(&self) -> Option<u64> {
        self.inner
            .rdn_idx
            .forward_lookup(&ParentIdAndRdn::suffix(&self.inner.suffix))
    }

    /// The ids above an entry, parent first.
    fn ancestor_ids(&self, id: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = id;
        while let Some(p) = self.parent_of(cur) {
            if p == ROOT_PARENT_ID || out.contains(&p) {
                break;
            }
            out.push(p);
            cur = p;
        }
        out
    }

    fn notify(&self, change: &PartitionChange<'_>) {
        for l in read_lock(&self.inner.listeners).iter() {
            l.committed(&self.inner.id, change);
        }
    }

    fn rdn_key(&self, parent_id: u64, dn: &Dn) -> ParentIdAndRdn {
        match dn.rdn() {
            Some(rdn) if parent_id != ROOT_PARENT_ID => ParentIdAndRdn::new(parent_id, rdn.clone()),
            _ => ParentIdAndRdn::suffix(dn),
        }
    }

    fn index_attributes<'a, S>(&'a self, undo: &mut UndoLog<'a>, id: u64, entry: &Entry<S>) {
        for (oid, idx) in self.inner.attr_idx.iter() {
            if let Some(a) = entry.get_ava(oid) {
                idx_add(undo, &self.inner.presence_idx, oid.clone(), id);
                for v in a.values().iter() {
                    idx_add(undo, idx, v.index_key(), id);
                }
            }
        }
    }

    /// Bring the attribute indexes of the given types from `old` to `new`.
    fn reindex_attributes<'a, S1, S2>(
        &'a self,
        undo: &mut UndoLog<'a>,
        id: u64,
        old: &Entry<S1>,
        new: &Entry<S2>,
        only: Option<&BTreeSet<AttrString>>,
    ) {
        for (oid, idx) in self.inner.attr_idx.iter() {
            if only.map(|o| !o.contains(oid)).unwrap_or(false) {
                continue;
            }
            let keys = |a: Option<&crate::entry::Attribute>| -> BTreeSet<Vec<u8>> {
                a.map(|a| a.values().iter().map(|v| v.index_key()).collect())
                    .unwrap_or_default()
            };
            let old_a = old.get_ava(oid);
            let new_a = new.get_ava(oid);
            let old_keys = keys(old_a);
            let new_keys = keys(new_a);
            for k in old_keys.difference(&new_keys) {
                idx_drop(undo, idx, k.clone(), id);
            }
            for k in new_keys.difference(&old_keys) {
                idx_add(undo, idx, k.clone(), id);
            }
            match (old_a.is_some(), new_a.is_some()) {
                (true, false) => idx_drop(undo, &self.inner.presence_idx, oid.clone(), id),
                (false, true) => idx_add(undo, &self.inner.presence_idx, oid.clone(), id),
                _ => {}
            }
        }
    }

    /// Resolve and check the target of an alias entry.
    fn alias_target<S>(&self, entry: &Entry<S>) -> Result<Option<u64>, OperationError> {
        if !entry.is_alias() {
            return Ok(None);
        }
        let target = entry
            .get_ava_single_str(ATTR_ALIASED_OBJECT_NAME)
            .ok_or_else(|| OperationError::AliasProblem("alias has no aliasedObjectName".to_string()))?;
        let target = Dn::parse(target)?.normalized(&self.inner.schema.read())?;
        if entry.dn().is_descendant_or_self(&target) {
            return Err(OperationError::AliasProblem(format!(
                "alias {} can not point to itself or an ancestor",
                entry.dn()
            )));
        }
        if !target.is_descendant_or_self(&self.inner.suffix) {
            return Err(OperationError::AliasProblem(format!(
                "alias target {} is outside of partition {}",
                target, self.inner.id
            )));
        }
        let tid = self
            .dn_to_id(&target)
            .map_err(|_| OperationError::AliasProblem(format!("alias target {} does not exist", target)))?;
        if self.is_alias_id(tid) {
            return Err(OperationError::AliasProblem(format!(
                "alias target {} is itself an alias",
                target
            )));
        }
        Ok(Some(tid))
    }

    fn index_alias<'a>(&'a self, undo: &mut UndoLog<'a>, alias_id: u64, target_id: u64) {
        idx_add(undo, &self.inner.alias_idx, target_id, alias_id);
        let ancestors = self.ancestor_ids(alias_id);
        if let Some(parent) = ancestors.first() {
            if self.parent_of(target_id) != Some(*parent) {
                idx_add(undo, &self.inner.one_alias_idx, *parent, target_id);
            }
        }
        for a in ancestors.iter() {
            if !self.in_subtree(*a, target_id) {
                idx_add(undo, &self.inner.sub_alias_idx, *a, target_id);
            }
        }
    }

    fn unindex_alias<'a>(&'a self, undo: &mut UndoLog<'a>, alias_id: u64) {
        let ancestors = self.ancestor_ids(alias_id);
        for target in self.inner.alias_idx.reverse_lookup(alias_id) {
            idx_drop(undo, &self.inner.alias_idx, target, alias_id);
            // Other aliases of the same target may still need the rows.
            let others = self.inner.alias_idx.ids_for_key(&target);
            if let Some(parent) = ancestors.first() {
                if !others.iter().any(|o| self.parent_of(*o) == Some(*parent)) {
                    idx_drop(undo, &self.inner.one_alias_idx, *parent, target);
                }
            }
            for a in ancestors.iter() {
                if !others.iter().any(|o| self.in_subtree(*a, *o)) {
                    idx_drop(undo, &self.inner.sub_alias_idx, *a, target);
                }
            }
        }
    }

    fn master_insert<'a>(&'a self, undo: &mut UndoLog<'a>, id: u64, e: Arc<EntrySealedCommitted>) {
        let prev = write_lock(&self.inner.master).insert(id, e);
        undo.push(move || {
            let mut m = write_lock(&self.inner.master);
            match prev {
                Some(p) => m.insert(id, p),
                None => m.remove(&id),
            };
        });
    }

    #[instrument(level = "debug", name = "be::add", skip_all)]
    pub fn add_entry(&self, mut entry: Entry<EntryNew>) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        let _structure = read_lock(&self.inner.structure);
        let dn = entry.dn().clone();
        if !dn.is_descendant_or_self(&self.inner.suffix) {
            return Err(OperationError::no_such_object(None));
        }
        {
            let schema_ro = self.inner.schema.read();
            entry.ensure_rdn_values(&schema_ro)?;
            entry.schema_check(&schema_ro).map_err(|e| {
                request_error!(dn = %dn, err = ?e, "schema violation on add");
                OperationError::SchemaViolation(e)
            })?;
        }

        let parent_id = if dn == self.inner.suffix {
            ROOT_PARENT_ID
        } else {
            let parent = dn.parent().unwrap_or_else(Dn::root);
            self.dn_to_id(&parent)?
        };
        let key = self.rdn_key(parent_id, &dn);
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let _locks = self.inner.locks.lock(&[parent_id, id]);

        if parent_id != ROOT_PARENT_ID && self.fetch(parent_id).is_none() {
            return Err(OperationError::no_such_object(
                dn.parent().map(|p| p.to_string()),
            ));
        }
        if self.inner.rdn_idx.forward_lookup(&key).is_some() {
            return Err(OperationError::EntryAlreadyExists(dn.to_string()));
        }

        let mut undo = UndoLog::new();
        idx_add(&mut undo, &self.inner.rdn_idx, key, id);
        if parent_id != ROOT_PARENT_ID {
            if let Some(rdn) = dn.rdn() {
                idx_add(&mut undo, &self.inner.one_level_idx, ChildKey::new(parent_id, rdn.clone()), id);
            }
        }
        idx_add(&mut undo, &self.inner.sub_level_idx, id, id);
        for a in self.ancestor_ids(id) {
            idx_add(&mut undo, &self.inner.sub_level_idx, a, id);
        }
        self.index_attributes(&mut undo, id, &entry);
        // Last, as a missing target is only found here.
        if let Some(target) = self.alias_target(&entry)? {
            self.index_alias(&mut undo, id, target);
        }

        let committed = Arc::new(entry.into_committed(id));
        self.master_insert(&mut undo, id, committed.clone());
        undo.commit();

        request_trace!(partition = %self.inner.id, id, dn = %dn, "entry added");
        self.notify(&PartitionChange::Add { entry: &committed });
        Ok(committed)
    }

    #[instrument(level = "debug", name = "be::delete", skip_all)]
    pub fn delete_id(&self, id: u64) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        let _structure = read_lock(&self.inner.structure);
        let parent_id = self.parent_of(id).unwrap_or(ROOT_PARENT_ID);
        let _locks = self.inner.locks.lock(&[parent_id, id]);
        let entry = self.lookup_id(id)?;

        if self.child_count(id) > 0 {
            request_warn!(dn = %entry.dn(), "refusing to delete an entry with subordinates");
            return Err(OperationError::NotAllowedOnNonLeaf);
        }

        let mut undo = UndoLog::new();
        if self.is_alias_id(id) {
            self.unindex_alias(&mut undo, id);
        }
        for k in self.inner.rdn_idx.reverse_lookup(id) {
            idx_drop(&mut undo, &self.inner.rdn_idx, k, id);
        }
        for k in self.inner.one_level_idx.reverse_lookup(id) {
            idx_drop(&mut undo, &self.inner.one_level_idx, k, id);
        }
        for k in self.inner.sub_level_idx.reverse_lookup(id) {
            idx_drop(&mut undo, &self.inner.sub_level_idx, k, id);
        }
        for k in self.inner.presence_idx.reverse_lookup(id) {
            idx_drop(&mut undo, &self.inner.presence_idx, k, id);
        }
        for idx in self.inner.attr_idx.values() {
            for k in idx.reverse_lookup(id) {
                idx_drop(&mut undo, idx, k, id);
            }
        }
        let removed = write_lock(&self.inner.master).remove(&id);
        let Some(removed) = removed else {
            return Err(OperationError::CorruptedEntry(id));
        };
        undo.commit();

        request_trace!(partition = %self.inner.id, id, dn = %removed.dn(), "entry deleted");
        self.notify(&PartitionChange::Delete { entry: &removed });
        Ok(removed)
    }

    #[instrument(level = "debug", name = "be::modify", skip_all)]
    pub fn modify_id(
        &self,
        id: u64,
        mods: &ModifyList<ModifyValid>,
    ) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        let _structure = read_lock(&self.inner.structure);
        let _locks = self.inner.locks.lock(&[id]);
        let old = self.lookup_id(id)?;

        if let Some(m) = mods.user_mods().find(|m| m.attr.no_user_modification) {
            security_access!(attr = %m.attr.name(), dn = %old.dn(), "modification of a protected attribute");
            return Err(OperationError::InsufficientAccessRights);
        }

        let mut new = old.clone_new();
        new.apply_modlist(mods)?;
        if !new.rdn_values_present() {
            return Err(OperationError::NotAllowedOnRdn);
        }
        new.schema_check(&self.inner.schema.read()).map_err(|e| {
            request_error!(dn = %old.dn(), err = ?e, "schema violation on modify");
            OperationError::SchemaViolation(e)
        })?;

        let mut undo = UndoLog::new();
        let touched = mods.touched_oids();
        self.reindex_attributes(&mut undo, id, old.as_ref(), &new, Some(&touched));
        let alias_changed = old.is_alias() != new.is_alias()
            || old.get_ava_single_str(ATTR_ALIASED_OBJECT_NAME)
                != new.get_ava_single_str(ATTR_ALIASED_OBJECT_NAME);
        if alias_changed {
            self.unindex_alias(&mut undo, id);
            if let Some(target) = self.alias_target(&new)? {
                self.index_alias(&mut undo, id, target);
            }
        }

        let committed = Arc::new(new.into_committed(id));
        self.master_insert(&mut undo, id, committed.clone());
        undo.commit();

        self.notify(&PartitionChange::Modify {
            before: &old,
            after: &committed,
            mods,
        });
        Ok(committed)
    }

    /// Rename and/or move an entry, carrying its subtree along.
    #[instrument(level = "debug", name = "be::relocate", skip_all)]
    pub fn relocate_id(
        &self,
        id: u64,
        new_parent: Option<u64>,
        new_rdn: Option<&Rdn>,
        delete_old_rdn: bool,
        mods: &ModifyList<ModifyValid>,
    ) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        // Subtree names are rewritten, so no other structural change may interleave.
        let _structure = write_lock(&self.inner.structure);
        let old = self.lookup_id(id)?;
        let old_parent = self.parent_of(id).unwrap_or(ROOT_PARENT_ID);
        if old_parent == ROOT_PARENT_ID {
            return Err(OperationError::UnwillingToPerform(
                "the suffix entry of a partition can not be renamed or moved".to_string(),
            ));
        }
        let target_parent = new_parent.unwrap_or(old_parent);
        if self.in_subtree(id, target_parent) {
            return Err(OperationError::UnwillingToPerform(
                "an entry can not be moved below itself".to_string(),
            ));
        }
        let parent_entry = self.lookup_id(target_parent)?;
        let old_rdn = old
            .dn()
            .rdn()
            .cloned()
            .ok_or(OperationError::InvalidState)?;
        let rdn = new_rdn.cloned().unwrap_or_else(|| old_rdn.clone());
        let new_dn = parent_entry.dn().child(rdn.clone());

        let subtree: Vec<u64> = self.inner.sub_level_idx.ids_for_key(&id).into_iter().collect();
        let mut lock_ids = subtree.clone();
        lock_ids.push(old_parent);
        lock_ids.push(target_parent);
        let _locks = self.inner.locks.lock(&lock_ids);

        let new_key = ParentIdAndRdn::new(target_parent, rdn.clone());
        match self.inner.rdn_idx.forward_lookup(&new_key) {
            Some(other) if other != id => {
                return Err(OperationError::EntryAlreadyExists(new_dn.to_string()));
            }
            _ => {}
        }

        let mut new = old.clone_new();
        new.set_dn(new_dn.clone());
        if new_rdn.is_some() {
            let schema_ro = self.inner.schema.read();
            if delete_old_rdn {
                for ava in old_rdn.avas() {
                    if rdn.avas().contains(ava) {
                        continue;
                    }
                    let (sa, v) = schema_ro.value_for(ava.oid(), ava.value())?;
                    new.remove_ava(&sa.oid, &v);
                }
            }
            new.ensure_rdn_values(&schema_ro)?;
        }
        new.apply_modlist(mods)?;
        new.schema_check(&self.inner.schema.read())
            .map_err(OperationError::SchemaViolation)?;

        let mut undo = UndoLog::new();
        // Targets keep their ids when they move, so remember them across the rewrite.
        let aliases: Vec<(u64, u64)> = subtree
            .iter()
            .filter_map(|s| self.alias_target_of(*s).map(|t| (*s, t)))
            .collect();
        for (a, _) in aliases.iter() {
            self.unindex_alias(&mut undo, *a);
        }

        for k in self.inner.rdn_idx.reverse_lookup(id) {
            idx_drop(&mut undo, &self.inner.rdn_idx, k, id);
        }
        idx_add(&mut undo, &self.inner.rdn_idx, new_key, id);
        idx_drop(
            &mut undo,
            &self.inner.one_level_idx,
            ChildKey::new(old_parent, old_rdn),
            id,
        );
        idx_add(
            &mut undo,
            &self.inner.one_level_idx,
            ChildKey::new(target_parent, rdn),
            id,
        );

        if target_parent != old_parent {
            let old_anc: Vec<u64> = std::iter::once(old_parent)
                .chain(self.ancestor_ids(old_parent))
                .collect();
            let new_anc: Vec<u64> = std::iter::once(target_parent)
                .chain(self.ancestor_ids(target_parent))
                .collect();
            for s in subtree.iter() {
                for a in old_anc.iter() {
                    idx_drop(&mut undo, &self.inner.sub_level_idx, *a, *s);
                }
                for a in new_anc.iter() {
                    idx_add(&mut undo, &self.inner.sub_level_idx, *a, *s);
                }
            }
        }

        for (a, target) in aliases.iter() {
            self.index_alias(&mut undo, *a, *target);
        }

        self.reindex_attributes(&mut undo, id, old.as_ref(), &new, None);

        let committed = Arc::new(new.into_committed(id));
        self.master_insert(&mut undo, id, committed.clone());
        for s in subtree.iter().filter(|s| **s != id) {
            let Some(e) = self.fetch(*s) else {
                return Err(OperationError::CorruptedEntry(*s));
            };
            let Some(moved) = e.dn().rebase(old.dn(), &new_dn) else {
                return Err(OperationError::CorruptedEntry(*s));
            };
            let mut ne = e.as_ref().clone();
            ne.set_dn(moved);
            self.master_insert(&mut undo, *s, Arc::new(ne));
        }
        undo.commit();

        request_trace!(
            partition = %self.inner.id,
            id,
            from = %old.dn(),
            to = %committed.dn(),
            "entry relocated"
        );
        let superior = parent_entry.dn().clone();
        self.notify(&PartitionChange::Relocate {
            before: &old,
            after: &committed,
            delete_old_rdn,
            new_superior: new_parent.map(|_| &superior),
        });
        Ok(committed)
    }

    pub fn lookup_id(&self, id: u64) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        self.fetch(id)
            .ok_or_else(|| OperationError::no_such_object(None))
    }

    /// Walk the RDN index from the suffix down to `dn`.
    fn resolve_dn(&self, dn: &Dn) -> Result<u64, OperationError> {
        let Some(relative) = dn.relative_to(&self.inner.suffix) else {
            return Err(OperationError::no_such_object(None));
        };
        let Some(mut id) = self.suffix_id() else {
            return Err(OperationError::no_such_object(None));
        };
        let mut matched = self.inner.suffix.clone();
        for rdn in relative.iter().rev() {
            match self
                .inner
                .rdn_idx
                .forward_lookup(&ParentIdAndRdn::new(id, rdn.clone()))
            {
                Some(child) => {
                    id = child;
                    matched = matched.child(rdn.clone());
                }
                None => {
                    let matched = self
                        .fetch(id)
                        .map(|e| e.dn().to_string())
                        .unwrap_or_else(|| matched.to_string());
                    return Err(OperationError::no_such_object(Some(matched)));
                }
            }
        }
        Ok(id)
    }

    fn verify_entry(
        &self,
        id: u64,
        entry: &EntrySealedCommitted,
        results: &mut Vec<Result<(), ConsistencyError>>,
    ) {
        let pid = self.inner.id.clone();
        let keys = self.inner.rdn_idx.reverse_lookup(id);
        let Some(key) = keys.iter().next() else {
            results.push(Err(ConsistencyError::RdnIndexCorrupt(pid, id)));
            return;
        };
        if keys.len() != 1 || self.inner.rdn_idx.forward_lookup(key) != Some(id) {
            results.push(Err(ConsistencyError::RdnIndexCorrupt(pid.clone(), id)));
        }

        let parent = key.parent_id();
        let ancestors = self.ancestor_ids(id);
        if parent == ROOT_PARENT_ID {
            if entry.dn() != &self.inner.suffix {
                results.push(Err(ConsistencyError::EntryDnMismatch(pid.clone(), id)));
            }
        } else {
            match self.fetch(parent) {
                None => results.push(Err(ConsistencyError::OrphanEntry(pid.clone(), id))),
                Some(p) => {
                    let expect = key.rdns().first().map(|rdn| p.dn().child(rdn.clone()));
                    if expect.as_ref() != Some(entry.dn()) {
                        results.push(Err(ConsistencyError::EntryDnMismatch(pid.clone(), id)));
                    }
                }
            }
            let child_ok = entry
                .dn()
                .rdn()
                .map(|rdn| {
                    self.inner
                        .one_level_idx
                        .forward(&ChildKey::new(parent, rdn.clone()), id)
                })
                .unwrap_or(false);
            if !child_ok {
                results.push(Err(ConsistencyError::OneLevelIndexCorrupt(pid.clone(), id)));
            }
        }

        let sub_keys = self.inner.sub_level_idx.reverse_lookup(id);
        let expected: BTreeSet<u64> = ancestors.iter().copied().chain(std::iter::once(id)).collect();
        if sub_keys != expected {
            results.push(Err(ConsistencyError::SubLevelIndexCorrupt(pid.clone(), id)));
        }

        if entry.is_alias() != self.is_alias_id(id) {
            results.push(Err(ConsistencyError::AliasIndexCorrupt(pid.clone(), id)));
        }

        for (oid, idx) in self.inner.attr_idx.iter() {
            let present = entry.get_ava(oid);
            if present.is_some() != self.inner.presence_idx.forward(oid, id) {
                results.push(Err(ConsistencyError::PresenceIndexCorrupt(pid.clone(), id)));
            }
            let expect: BTreeSet<Vec<u8>> = present
                .map(|a| a.values().iter().map(|v| v.index_key()).collect())
                .unwrap_or_default();
            if idx.reverse_lookup(id) != expect {
                results.push(Err(ConsistencyError::AttributeIndexCorrupt(
                    pid.clone(),
                    idx.name().to_string(),
                    id,
                )));
            }
        }
    }
}

impl Partition for BTreePartition {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn suffix(&self) -> &Dn {
        &self.inner.suffix
    }

    fn add(&self, entry: Entry<EntryNew>) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        self.add_entry(entry)
    }

    fn delete(&self, dn: &Dn) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        let id = self.resolve_dn(dn)?;
        self.delete_id(id)
    }

    fn modify(
        &self,
        dn: &Dn,
        mods: &ModifyList<ModifyValid>,
    ) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        let id = self.resolve_dn(dn)?;
        self.modify_id(id, mods)
    }

    fn rename(
        &self,
        dn: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
        mods: &ModifyList<ModifyValid>,
    ) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        let id = self.resolve_dn(dn)?;
        self.relocate_id(id, None, Some(new_rdn), delete_old_rdn, mods)
    }

    fn move_entry(
        &self,
        dn: &Dn,
        new_superior: &Dn,
        mods: &ModifyList<ModifyValid>,
    ) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        let id = self.resolve_dn(dn)?;
        let parent = self.resolve_dn(new_superior)?;
        self.relocate_id(id, Some(parent), None, false, mods)
    }

    fn move_and_rename(
        &self,
        dn: &Dn,
        new_superior: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
        mods: &ModifyList<ModifyValid>,
    ) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        let id = self.resolve_dn(dn)?;
        let parent = self.resolve_dn(new_superior)?;
        self.relocate_id(id, Some(parent), Some(new_rdn), delete_old_rdn, mods)
    }

    fn lookup(&self, id: u64) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        self.lookup_id(id)
    }

    fn lookup_dn(&self, dn: &Dn) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        let id = self.resolve_dn(dn)?;
        self.lookup_id(id)
    }

    fn dn_to_id(&self, dn: &Dn) -> Result<u64, OperationError> {
        self.resolve_dn(dn)
    }

    fn has_children(&self, dn: &Dn) -> Result<bool, OperationError> {
        let id = self.resolve_dn(dn)?;
        Ok(self.child_count(id) > 0)
    }

    fn count_children(&self, dn: &Dn) -> Result<usize, OperationError> {
        let id = self.resolve_dn(dn)?;
        Ok(self.child_count(id))
    }

    fn search(
        &self,
        base: &Dn,
        scope: SearchScope,
        deref: DerefAliases,
        filter: &Filter<FilterValid>,
    ) -> Result<PartitionSearch, OperationError> {
        search::search_partition(self, base, scope, deref, filter)
    }

    fn entry_count(&self) -> usize {
        read_lock(&self.inner.master).len()
    }

    #[instrument(level = "debug", name = "be::verify", skip_all)]
    fn verify(&self) -> Vec<Result<(), ConsistencyError>> {
        let _structure = write_lock(&self.inner.structure);
        let entries: Vec<(u64, Arc<EntrySealedCommitted>)> = read_lock(&self.inner.master)
            .iter()
            .map(|(id, e)| (*id, e.clone()))
            .collect();
        let mut results = Vec::new();
        for (id, e) in entries.iter() {
            if e.get_id() != *id {
                results.push(Err(ConsistencyError::EntryDnMismatch(self.inner.id.clone(), *id)));
            }
            self.verify_entry(*id, e, &mut results);
        }

        let count = entries.len();
        let pid = self.inner.id.clone();
        if self.inner.rdn_idx.count() != count {
            results.push(Err(ConsistencyError::IndexCountMismatch(pid.clone(), "rdn".to_string())));
        }
        let non_suffix = count.saturating_sub(usize::from(self.suffix_id().is_some()));
        if self.inner.one_level_idx.count() != non_suffix {
            results.push(Err(ConsistencyError::IndexCountMismatch(pid.clone(), "oneLevel".to_string())));
        }
        // Rows naming entries that no longer exist.
        for idx in self.inner.attr_idx.values() {
            if idx.ids().iter().any(|id| self.fetch(*id).is_none()) {
                results.push(Err(ConsistencyError::IndexCountMismatch(
                    pid.clone(),
                    idx.name().to_string(),
                )));
            }
        }
        if self
            .inner
            .alias_idx
            .rows()
            .iter()
            .any(|r| self.fetch(r.id).is_none())
        {
            results.push(Err(ConsistencyError::IndexCountMismatch(pid, "alias".to_string())));
        }

        if results.is_empty() {
            admin_debug!(partition = %self.inner.id, entries = count, "partition verified");
        } else {
            admin_error!(partition = %self.inner.id, errors = results.len(), "partition verification failed");
        }
        results
    }

    fn register_listener(&self, listener: Arc<dyn PartitionListener>) {
        write_lock(&self.inner.listeners).push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::{BTreePartition, Partition};
    use crate::be::cursor::Cursor;
    use crate::be::mirror::LdifMirror;
    use crate::config::PartitionConfig;
    use crate::event::{DerefAliases, SearchScope};
    use crate::filter::FilterPlan;
    use crate::modify::m_replace;
    use crate::prelude::*;

    const PEOPLE: &str = "ou=people,dc=example,dc=com";

    fn add(schema: &Schema, p: &BTreePartition, ei: EntryInit) -> Arc<EntrySealedCommitted> {
        let e = ei.into_entry(&schema.read()).unwrap();
        p.add(e).unwrap()
    }

    fn person(dn: &str, cn: &str, sn: &str) -> EntryInit {
        EntryInit::new(dn)
            .with(ATTR_OBJECTCLASS, CLASS_PERSON)
            .with(ATTR_CN, cn)
            .with(ATTR_SN, sn)
    }

    fn ou(dn: &str, name: &str) -> EntryInit {
        EntryInit::new(dn)
            .with(ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT)
            .with(ATTR_OU, name)
    }

    fn dn(schema: &Schema, s: &str) -> Dn {
        Dn::parse(s).unwrap().normalized(&schema.read()).unwrap()
    }

    fn setup() -> (Schema, BTreePartition) {
        let schema = Schema::new().unwrap();
        let config = PartitionConfig {
            indexed_attributes: vec![ATTR_CN.to_string(), ATTR_SN.to_string()],
            ..PartitionConfig::new("example", "dc=example,dc=com")
        };
        let p = BTreePartition::new(&config, schema.clone()).unwrap();
        add(
            &schema,
            &p,
            EntryInit::new("dc=example,dc=com")
                .with(ATTR_OBJECTCLASS, CLASS_DOMAIN)
                .with(ATTR_DC, "example"),
        );
        add(&schema, &p, ou(PEOPLE, "people"));
        add(&schema, &p, person("cn=alice,ou=people,dc=example,dc=com", "alice", "adams"));
        add(&schema, &p, person("cn=bob,ou=people,dc=example,dc=com", "bob", "brown"));
        (schema, p)
    }

    fn search(
        schema: &Schema,
        p: &BTreePartition,
        base: &str,
        scope: SearchScope,
        deref: DerefAliases,
        filter: &str,
    ) -> (Vec<String>, FilterPlan) {
        let f = Filter::parse(filter)
            .unwrap()
            .validate(&schema.read())
            .unwrap();
        let mut s = p.search(&dn(schema, base), scope, deref, &f).unwrap();
        let dns = s
            .cursor
            .collect_all()
            .unwrap()
            .into_iter()
            .map(|e| e.dn().to_string())
            .collect();
        (dns, s.plan)
    }

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    #[test]
    fn test_add_lookup_and_verify() {
        let (schema, p) = setup();
        assert_eq!(p.entry_count(), 4);

        let alice = p
            .lookup_dn(&dn(&schema, "CN=Alice,ou=People,dc=example,dc=com"))
            .unwrap();
        assert!(alice.attribute_equality_str(ATTR_SN, "Adams"));
        assert_eq!(p.lookup(alice.get_id()).unwrap().get_id(), alice.get_id());
        assert!(p.has_children(&dn(&schema, PEOPLE)).unwrap());
        assert!(!p.has_children(alice.dn()).unwrap());

        let err = p
            .dn_to_id(&dn(&schema, "cn=carol,ou=missing,ou=people,dc=example,dc=com"))
            .unwrap_err();
        assert_eq!(err.matched_dn(), Some(PEOPLE));

        let dup = person("cn=alice,ou=people,dc=example,dc=com", "alice", "again")
            .into_entry(&schema.read())
            .unwrap();
        assert!(matches!(
            p.add(dup),
            Err(OperationError::EntryAlreadyExists(_))
        ));

        let orphan = person("cn=zed,ou=nowhere,dc=example,dc=com", "zed", "z")
            .into_entry(&schema.read())
            .unwrap();
        let err = p.add(orphan).unwrap_err();
        assert_eq!(err.matched_dn(), Some("dc=example,dc=com"));

        let invalid = EntryInit::new("cn=nosn,ou=people,dc=example,dc=com")
            .with(ATTR_OBJECTCLASS, CLASS_PERSON)
            .into_entry(&schema.read())
            .unwrap();
        assert!(matches!(
            p.add(invalid),
            Err(OperationError::SchemaViolation(_))
        ));

        assert_eq!(p.entry_count(), 4);
        assert!(p.verify().is_empty());
    }

    #[test]
    fn test_delete_non_leaf_leaves_store_unchanged() {
        let (schema, p) = setup();
        assert!(matches!(
            p.delete(&dn(&schema, PEOPLE)),
            Err(OperationError::NotAllowedOnNonLeaf)
        ));
        assert_eq!(p.entry_count(), 4);
        assert!(p.verify().is_empty());

        p.delete(&dn(&schema, "cn=alice,ou=people,dc=example,dc=com"))
            .unwrap();
        p.delete(&dn(&schema, "cn=bob,ou=people,dc=example,dc=com"))
            .unwrap();
        p.delete(&dn(&schema, PEOPLE)).unwrap();
        assert_eq!(p.entry_count(), 1);
        assert!(p.verify().is_empty());

        let (dns, _) = search(
            &schema,
            &p,
            "dc=example,dc=com",
            SearchScope::Subtree,
            DerefAliases::Never,
            "(cn=alice)",
        );
        assert!(dns.is_empty());
    }

    #[test]
    fn test_one_level_children_in_rdn_order() {
        let (schema, p) = setup();
        add(&schema, &p, person("cn=zed,ou=people,dc=example,dc=com", "zed", "z"));
        add(&schema, &p, person("cn=amy,ou=people,dc=example,dc=com", "amy", "a"));

        let (dns, plan) = search(
            &schema,
            &p,
            PEOPLE,
            SearchScope::OneLevel,
            DerefAliases::Never,
            "(objectClass=*)",
        );
        assert_eq!(
            dns,
            vec![
                "cn=alice,ou=people,dc=example,dc=com",
                "cn=amy,ou=people,dc=example,dc=com",
                "cn=bob,ou=people,dc=example,dc=com",
                "cn=zed,ou=people,dc=example,dc=com",
            ]
        );
        assert!(plan.is_indexed());

        let (dns, _) = search(
            &schema,
            &p,
            PEOPLE,
            SearchScope::Base,
            DerefAliases::Never,
            "(objectClass=*)",
        );
        assert_eq!(dns, vec![PEOPLE.to_string()]);
    }

    #[test]
    fn test_search_filters_and_plans() {
        let (schema, p) = setup();
        let sub = |f: &str| {
            search(
                &schema,
                &p,
                "dc=example,dc=com",
                SearchScope::Subtree,
                DerefAliases::Never,
                f,
            )
        };

        let (dns, plan) = sub("(cn=alice)");
        assert_eq!(dns, vec!["cn=alice,ou=people,dc=example,dc=com"]);
        assert!(matches!(plan, FilterPlan::AndIndexed(_)));

        let (dns, plan) = sub("(&(cn=alice)(description=x))");
        assert!(dns.is_empty());
        match plan {
            FilterPlan::AndIndexed(parts) => {
                assert!(matches!(parts[0], FilterPlan::Scope(_)));
                assert!(matches!(parts[1], FilterPlan::AndPartial(_)));
            }
            other => panic!("unexpected plan {:?}", other),
        }

        let (dns, _) = sub("(|(cn=alice)(sn=adams))");
        assert_eq!(dns, vec!["cn=alice,ou=people,dc=example,dc=com"]);

        let (dns, _) = sub("(|(cn=alice)(cn=bob))");
        assert_eq!(
            sorted(dns),
            vec![
                "cn=alice,ou=people,dc=example,dc=com",
                "cn=bob,ou=people,dc=example,dc=com"
            ]
        );

        let (dns, _) = sub("(cn>=b)");
        assert_eq!(dns, vec!["cn=bob,ou=people,dc=example,dc=com"]);

        let (dns, _) = sub("(cn=al*)");
        assert_eq!(dns, vec!["cn=alice,ou=people,dc=example,dc=com"]);

        let (dns, _) = sub("(&(objectClass=person)(!(cn=alice)))");
        assert_eq!(dns, vec!["cn=bob,ou=people,dc=example,dc=com"]);

        let (dns, plan) = sub("(nosuchattribute=x)");
        assert!(dns.is_empty());
        assert!(matches!(plan, FilterPlan::AndIndexed(_)));

        // An undefined component is not a match, negated or not.
        let (dns, _) = sub("(!(nosuchattribute=x))");
        assert!(dns.is_empty());
    }

    #[test]
    fn test_search_cursor_walks_backwards() {
        let (schema, p) = setup();
        let f = Filter::parse("(objectClass=person)")
            .unwrap()
            .validate(&schema.read())
            .unwrap();
        let mut s = p
            .search(&dn(&schema, PEOPLE), SearchScope::OneLevel, DerefAliases::Never, &f)
            .unwrap();
        assert!(s.cursor.last().unwrap());
        assert_eq!(
            s.cursor.get().unwrap().dn().to_string(),
            "cn=bob,ou=people,dc=example,dc=com"
        );
        assert!(s.cursor.previous().unwrap());
        assert_eq!(
            s.cursor.get().unwrap().dn().to_string(),
            "cn=alice,ou=people,dc=example,dc=com"
        );
        assert!(!s.cursor.previous().unwrap());
        s.cursor.close();
        assert_eq!(s.cursor.next(), Err(OperationError::CursorClosed));
    }

    #[test]
    fn test_modify_reindexes() {
        let (schema, p) = setup();
        let alice = dn(&schema, "cn=alice,ou=people,dc=example,dc=com");
        let mods = ModifyList::new_list(vec![m_replace(ATTR_SN, &["smith"])])
            .validate(&schema.read())
            .unwrap();
        p.modify(&alice, &mods).unwrap();

        let sub = |f: &str| {
            search(
                &schema,
                &p,
                "dc=example,dc=com",
                SearchScope::Subtree,
                DerefAliases::Never,
                f,
            )
            .0
        };
        assert_eq!(sub("(sn=smith)"), vec!["cn=alice,ou=people,dc=example,dc=com"]);
        assert!(sub("(sn=adams)").is_empty());

        let mods = ModifyList::new_list(vec![m_replace(ATTR_CN, &["alicia"])])
            .validate(&schema.read())
            .unwrap();
        assert!(matches!(
            p.modify(&alice, &mods),
            Err(OperationError::NotAllowedOnRdn)
        ));
        assert_eq!(sub("(cn=alice)"), vec!["cn=alice,ou=people,dc=example,dc=com"]);
        assert!(p.verify().is_empty());
    }

    #[test]
    fn test_rename_and_move_subtree() {
        let (schema, p) = setup();
        add(&schema, &p, ou("ou=staff,ou=people,dc=example,dc=com", "staff"));
        add(
            &schema,
            &p,
            person("cn=dave,ou=staff,ou=people,dc=example,dc=com", "dave", "davis"),
        );
        let none = ModifyList::new_valid(Vec::new());

        let mut team = Rdn::parse("ou=team").unwrap();
        team.normalize(&schema.read()).unwrap();
        let renamed = p
            .rename(
                &dn(&schema, "ou=staff,ou=people,dc=example,dc=com"),
                &team,
                true,
                &none,
            )
            .unwrap();
        assert!(renamed.attribute_equality_str(ATTR_OU, "team"));
        assert!(!renamed.attribute_equality_str(ATTR_OU, "staff"));
        assert!(p
            .lookup_dn(&dn(&schema, "cn=dave,ou=team,ou=people,dc=example,dc=com"))
            .is_ok());
        assert!(p
            .lookup_dn(&dn(&schema, "cn=dave,ou=staff,ou=people,dc=example,dc=com"))
            .is_err());

        let moved = p
            .move_entry(
                &dn(&schema, "ou=team,ou=people,dc=example,dc=com"),
                &dn(&schema, "dc=example,dc=com"),
                &none,
            )
            .unwrap();
        assert_eq!(moved.dn().to_string(), "ou=team,dc=example,dc=com");
        let dave = p
            .lookup_dn(&dn(&schema, "cn=dave,ou=team,dc=example,dc=com"))
            .unwrap();
        assert_eq!(dave.dn().to_string(), "cn=dave,ou=team,dc=example,dc=com");

        let (dns, _) = search(
            &schema,
            &p,
            PEOPLE,
            SearchScope::Subtree,
            DerefAliases::Never,
            "(cn=dave)",
        );
        assert!(dns.is_empty());
        let (dns, _) = search(
            &schema,
            &p,
            "dc=example,dc=com",
            SearchScope::Subtree,
            DerefAliases::Never,
            "(cn=dave)",
        );
        assert_eq!(dns, vec!["cn=dave,ou=team,dc=example,dc=com"]);

        assert!(matches!(
            p.move_entry(
                &dn(&schema, PEOPLE),
                &dn(&schema, "cn=alice,ou=people,dc=example,dc=com"),
                &none
            ),
            Err(OperationError::UnwillingToPerform(_))
        ));
        let mut bob = Rdn::parse("cn=bob").unwrap();
        bob.normalize(&schema.read()).unwrap();
        assert!(matches!(
            p.rename(
                &dn(&schema, "cn=alice,ou=people,dc=example,dc=com"),
                &bob,
                false,
                &none
            ),
            Err(OperationError::EntryAlreadyExists(_))
        ));
        assert!(p.verify().is_empty());
    }

    #[test]
    fn test_alias_dereferencing() {
        let (schema, p) = setup();
        add(&schema, &p, ou("ou=groups,dc=example,dc=com", "groups"));
        add(
            &schema,
            &p,
            person("cn=carol,ou=groups,dc=example,dc=com", "carol", "clark"),
        );
        add(
            &schema,
            &p,
            EntryInit::new("cn=groups-link,ou=people,dc=example,dc=com")
                .with(ATTR_OBJECTCLASS, CLASS_ALIAS)
                .with(ATTR_OBJECTCLASS, CLASS_EXTENSIBLE_OBJECT)
                .with(ATTR_ALIASED_OBJECT_NAME, "ou=groups,dc=example,dc=com"),
        );

        let run = |scope, deref| {
            sorted(search(&schema, &p, PEOPLE, scope, deref, "(objectClass=*)").0)
        };

        assert_eq!(
            run(SearchScope::OneLevel, DerefAliases::Never),
            vec![
                "cn=alice,ou=people,dc=example,dc=com",
                "cn=bob,ou=people,dc=example,dc=com",
                "cn=groups-link,ou=people,dc=example,dc=com",
            ]
        );
        assert_eq!(
            run(SearchScope::OneLevel, DerefAliases::InSearching),
            vec![
                "cn=alice,ou=people,dc=example,dc=com",
                "cn=bob,ou=people,dc=example,dc=com",
                "ou=groups,dc=example,dc=com",
            ]
        );
        assert_eq!(
            run(SearchScope::Subtree, DerefAliases::Always),
            vec![
                "cn=alice,ou=people,dc=example,dc=com",
                "cn=bob,ou=people,dc=example,dc=com",
                "cn=carol,ou=groups,dc=example,dc=com",
                "ou=groups,dc=example,dc=com",
                "ou=people,dc=example,dc=com",
            ]
        );

        let (dns, _) = search(
            &schema,
            &p,
            "cn=groups-link,ou=people,dc=example,dc=com",
            SearchScope::Base,
            DerefAliases::FindingBaseObj,
            "(objectClass=*)",
        );
        assert_eq!(dns, vec!["ou=groups,dc=example,dc=com"]);

        // The indexed component is cheaper than the scope here, the scope is evaluated.
        let (dns, _) = search(
            &schema,
            &p,
            PEOPLE,
            SearchScope::Subtree,
            DerefAliases::InSearching,
            "(cn=carol)",
        );
        assert_eq!(dns, vec!["cn=carol,ou=groups,dc=example,dc=com"]);

        // Deleting the target leaves the alias dangling.
        p.delete(&dn(&schema, "cn=carol,ou=groups,dc=example,dc=com"))
            .unwrap();
        assert_eq!(
            run(SearchScope::Subtree, DerefAliases::Always).len(),
            4
        );
        assert!(p.verify().is_empty());
    }

    #[test]
    fn test_alias_with_missing_target_rolls_back() {
        let (schema, p) = setup();
        let alias = EntryInit::new("cn=broken,ou=people,dc=example,dc=com")
            .with(ATTR_OBJECTCLASS, CLASS_ALIAS)
            .with(ATTR_OBJECTCLASS, CLASS_EXTENSIBLE_OBJECT)
            .with(ATTR_ALIASED_OBJECT_NAME, "ou=nowhere,dc=example,dc=com")
            .into_entry(&schema.read())
            .unwrap();
        assert!(matches!(p.add(alias), Err(OperationError::AliasProblem(_))));

        let cyclic = EntryInit::new("cn=up,ou=people,dc=example,dc=com")
            .with(ATTR_OBJECTCLASS, CLASS_ALIAS)
            .with(ATTR_OBJECTCLASS, CLASS_EXTENSIBLE_OBJECT)
            .with(ATTR_ALIASED_OBJECT_NAME, PEOPLE)
            .into_entry(&schema.read())
            .unwrap();
        assert!(matches!(p.add(cyclic), Err(OperationError::AliasProblem(_))));

        assert_eq!(p.entry_count(), 4);
        assert!(p
            .lookup_dn(&dn(&schema, "cn=broken,ou=people,dc=example,dc=com"))
            .is_err());
        let (dns, _) = search(
            &schema,
            &p,
            PEOPLE,
            SearchScope::OneLevel,
            DerefAliases::Never,
            "(objectClass=*)",
        );
        assert_eq!(dns.len(), 2);
        assert!(p.verify().is_empty());
    }

    #[test]
    fn test_mirror_records_changes() {
        let (schema, p) = setup();
        let mirror = Arc::new(LdifMirror::new(Vec::<u8>::new()));
        p.register_listener(mirror.clone());

        add(&schema, &p, person("cn=erin,ou=people,dc=example,dc=com", "erin", "evans"));
        let erin = dn(&schema, "cn=erin,ou=people,dc=example,dc=com");
        let mods = ModifyList::new_list(vec![m_replace(ATTR_SN, &["ellis"])])
            .validate(&schema.read())
            .unwrap();
        p.modify(&erin, &mods).unwrap();
        p.delete(&erin).unwrap();

        assert_eq!(mirror.records_written(), 3);
        let text = mirror.with_sink(|s| String::from_utf8(s.clone()).unwrap());
        assert!(text.contains("dn: cn=erin,ou=people,dc=example,dc=com"));
        assert!(text.contains("changetype: add"));
        assert!(text.contains("replace: sn"));
        assert!(text.contains("changetype: delete"));
    }
}
