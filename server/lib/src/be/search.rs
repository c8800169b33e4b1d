//! Search planning and the cursors that carry entries back to the caller.
//!
//! A search is the conjunction of its scope and its filter. Each component is given a
//! count estimate from the indexes, the cheapest one becomes the candidate cursor, and
//! every other component is checked per candidate by an evaluator. Components that no
//! index can answer are estimated at the size of the partition.

use std::collections::BTreeSet;
use std::ops::Bound;

use crate::be::cursor::boolean::{AndCursor, NotCursor, OrCursor};
use crate::be::cursor::index::IndexIdCursor;
use crate::be::cursor::scope::ScopeCursor;
use crate::be::cursor::{ClosureMonitor, Cursor, DefaultClosureMonitor, IdCursor, ListCursor, TimeLimitMonitor};
use crate::be::evaluator::{Evaluator, ScopeEvaluator};
use crate::be::index::Index;
use crate::be::{BTreePartition, Partition};
use crate::entry::AttributeSelection;
use crate::event::{DerefAliases, SearchScope};
use crate::filter::{FilterPlan, FilterResolved, FilterValid};
use crate::prelude::*;

pub type EntryCursor = Box<dyn Cursor<Item = Arc<EntrySealedCommitted>>>;

/// The outcome of planning a search over one partition.
pub struct PartitionSearch {
    pub cursor: EntryCursor,
    pub plan: FilterPlan,
}

// An index answered it exactly, or it can never match.
fn answered(plan: &FilterPlan) -> bool {
    plan.is_indexed() || matches!(plan, FilterPlan::Invalid(_))
}

fn and_plan(plans: Vec<FilterPlan>) -> FilterPlan {
    if plans.iter().all(answered) {
        FilterPlan::AndIndexed(plans)
    } else if plans.iter().any(answered) {
        FilterPlan::AndPartial(plans)
    } else {
        FilterPlan::AndUnindexed(plans)
    }
}

/// Range components are answered from the equality index only when the byte order of
/// the index keys is the order the attribute compares by.
fn range_ids(p: &BTreePartition, f: &FilterResolved) -> Option<Vec<u64>> {
    let (sa, v, ge) = match f {
        FilterResolved::Ge(sa, v) => (sa, v, true),
        FilterResolved::Le(sa, v) => (sa, v, false),
        _ => return None,
    };
    let rule = sa.ordering_rule();
    if !rule.is_lexically_ordered() || rule != sa.equality {
        return None;
    }
    let idx = p.attr_index(&sa.oid)?;
    let key = v.index_key();
    let ids: BTreeSet<u64> = if ge {
        idx.ids_in_range(Bound::Included(&key), Bound::Unbounded)
    } else {
        idx.ids_in_range(Bound::Unbounded, Bound::Included(&key))
    };
    Some(ids.into_iter().collect())
}

fn estimate(p: &BTreePartition, f: &FilterResolved, universe: usize) -> (usize, FilterPlan) {
    match f {
        FilterResolved::Eq(sa, v) | FilterResolved::Approx(sa, v) => match p.attr_index(&sa.oid) {
            Some(idx) => (
                idx.count_key(&v.index_key()),
                FilterPlan::EqIndexed(
                    sa.name().into(),
                    v.norm_str().unwrap_or("<binary>").to_string(),
                ),
            ),
            None => (universe, FilterPlan::EqUnindexed(sa.name().into())),
        },
        FilterResolved::Pres(sa) => {
            if p.is_indexed(&sa.oid) {
                (
                    p.presence_index().count_key(&sa.oid),
                    FilterPlan::PresIndexed(sa.name().into()),
                )
            } else {
                (universe, FilterPlan::PresUnindexed(sa.name().into()))
            }
        }
        FilterResolved::Ge(sa, _) | FilterResolved::Le(sa, _) => match range_ids(p, f) {
            Some(ids) => (ids.len(), FilterPlan::RangeIndexed(sa.name().into())),
            None => (universe, FilterPlan::RangeUnindexed(sa.name().into())),
        },
        FilterResolved::Sub(sa, _) => (universe, FilterPlan::SubUnindexed(sa.name().into())),
        FilterResolved::And(l) => {
            let (counts, plans): (Vec<usize>, Vec<FilterPlan>) =
                l.iter().map(|f| estimate(p, f, universe)).unzip();
            (counts.into_iter().min().unwrap_or(0), and_plan(plans))
        }
        FilterResolved::Or(l) => {
            let (counts, plans): (Vec<usize>, Vec<FilterPlan>) =
                l.iter().map(|f| estimate(p, f, universe)).unzip();
            if plans.iter().all(answered) {
                (
                    counts.into_iter().sum::<usize>().min(universe),
                    FilterPlan::OrIndexed(plans),
                )
            } else {
                (universe, FilterPlan::OrUnindexed(plans))
            }
        }
        FilterResolved::Not(c) => (
            universe,
            FilterPlan::NotUniverse(Box::new(estimate(p, c, universe).1)),
        ),
        FilterResolved::Undefined(a) => (0, FilterPlan::Invalid(a.clone())),
    }
}

fn unindexed(p: &BTreePartition, f: &FilterResolved) -> IdCursor {
    Box::new(AndCursor::new(
        p.clone(),
        p.universe_cursor(),
        vec![Evaluator::Filter(f.clone())],
    ))
}

/// Pick the cheapest of a set of conjuncts. The others are returned for evaluation.
fn split_cheapest<'a>(
    p: &BTreePartition,
    components: &[&'a FilterResolved],
    universe: usize,
) -> (Option<(usize, &'a FilterResolved)>, Vec<&'a FilterResolved>) {
    let cheapest = components
        .iter()
        .enumerate()
        .filter_map(|(i, f)| {
            let (count, plan) = estimate(p, f, universe);
            answered(&plan).then_some((i, count))
        })
        .min_by_key(|(_, count)| *count);
    match cheapest {
        Some((i, count)) => {
            let rest = components
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, f)| *f)
                .collect();
            (Some((count, components[i])), rest)
        }
        None => (None, components.to_vec()),
    }
}

fn build(p: &BTreePartition, f: &FilterResolved, universe: usize) -> IdCursor {
    match f {
        FilterResolved::Eq(sa, v) | FilterResolved::Approx(sa, v) => match p.attr_index(&sa.oid) {
            Some(idx) => Box::new(IndexIdCursor::new(idx.forward_cursor_key(v.index_key()))),
            None => unindexed(p, f),
        },
        FilterResolved::Pres(sa) if p.is_indexed(&sa.oid) => Box::new(IndexIdCursor::new(
            p.presence_index().forward_cursor_key(sa.oid.clone()),
        )),
        FilterResolved::Ge(..) | FilterResolved::Le(..) => match range_ids(p, f) {
            Some(ids) => Box::new(ListCursor::new(ids)),
            None => unindexed(p, f),
        },
        FilterResolved::And(l) => {
            let components: Vec<&FilterResolved> = l.iter().collect();
            match split_cheapest(p, &components, universe) {
                (Some((_, candidate)), rest) => Box::new(AndCursor::new(
                    p.clone(),
                    build(p, candidate, universe),
                    rest.into_iter().cloned().map(Evaluator::Filter).collect(),
                )),
                (None, _) => unindexed(p, f),
            }
        }
        FilterResolved::Or(l) => {
            if l.iter().all(|c| answered(&estimate(p, c, universe).1)) {
                Box::new(OrCursor::new(
                    p.clone(),
                    l.iter()
                        .map(|c| (build(p, c, universe), Evaluator::Filter(c.clone())))
                        .collect(),
                ))
            } else {
                unindexed(p, f)
            }
        }
        FilterResolved::Not(c) => Box::new(NotCursor::new(
            p.clone(),
            p.universe_cursor(),
            c.as_ref().clone(),
        )),
        FilterResolved::Undefined(_) => Box::new(ListCursor::<u64>::empty()),
        FilterResolved::Pres(_) | FilterResolved::Sub(..) => unindexed(p, f),
    }
}

fn scope_estimate(p: &BTreePartition, base: u64, scope: SearchScope, deref: bool) -> usize {
    match scope {
        SearchScope::Base => 1,
        SearchScope::OneLevel => {
            let mut n = p.child_count(base);
            if deref {
                n += p.one_alias_targets(base).len();
            }
            n
        }
        SearchScope::Subtree => {
            let mut n = p.subtree_count(base);
            if deref {
                n += p
                    .sub_alias_targets(base)
                    .into_iter()
                    .map(|t| p.subtree_count(t))
                    .sum::<usize>();
            }
            n
        }
    }
}

#[instrument(level = "debug", name = "be::search", skip_all)]
pub(crate) fn search_partition(
    p: &BTreePartition,
    base: &Dn,
    scope: SearchScope,
    deref: DerefAliases,
    filter: &Filter<FilterValid>,
) -> Result<PartitionSearch, OperationError> {
    let mut base_id = p.dn_to_id(base)?;
    if deref.finding_base() {
        if let Some(target) = p.alias_target_of(base_id) {
            filter_trace!(alias = base_id, target_id = target, "dereferenced search base");
            base_id = target;
        } else if p.fetch(base_id).map(|e| e.is_alias()).unwrap_or(false) {
            return Err(OperationError::AliasProblem(format!(
                "alias {} has no target",
                base
            )));
        }
    }
    let deref_searching = deref.in_searching();
    let universe = p.entry_count();

    let components: Vec<&FilterResolved> = match filter.to_inner() {
        FilterResolved::And(l) => l.iter().collect(),
        f => vec![f],
    };
    let filter_plan = estimate(p, filter.to_inner(), universe).1;
    let scope_count = scope_estimate(p, base_id, scope, deref_searching);
    let scope_plan = FilterPlan::Scope(format!("{:?} {}", scope, base));

    let ids: IdCursor = match split_cheapest(p, &components, universe) {
        (Some((count, candidate)), rest) if count < scope_count => {
            let mut evaluators = vec![Evaluator::Scope(ScopeEvaluator::new(
                base_id,
                scope,
                deref_searching,
            ))];
            evaluators.extend(rest.into_iter().cloned().map(Evaluator::Filter));
            Box::new(AndCursor::new(
                p.clone(),
                build(p, candidate, universe),
                evaluators,
            ))
        }
        _ => Box::new(AndCursor::new(
            p.clone(),
            Box::new(ScopeCursor::new(p.clone(), base_id, scope, deref_searching)),
            components
                .into_iter()
                .cloned()
                .map(Evaluator::Filter)
                .collect(),
        )),
    };

    let plan = and_plan(vec![scope_plan, filter_plan]);
    filter_info!(?plan, scope_count, universe, "search plan");

    Ok(PartitionSearch {
        cursor: Box::new(IdToEntryCursor::new(p.clone(), ids)),
        plan,
    })
}

/// Turns candidate ids into stored entries. An id whose entry was removed after the
/// candidate was produced is skipped.
pub struct IdToEntryCursor {
    partition: BTreePartition,
    ids: IdCursor,
    current: Option<Arc<EntrySealedCommitted>>,
}

impl IdToEntryCursor {
    pub fn new(partition: BTreePartition, ids: IdCursor) -> Self {
        IdToEntryCursor {
            partition,
            ids,
            current: None,
        }
    }
}

impl Cursor for IdToEntryCursor {
    type Item = Arc<EntrySealedCommitted>;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.current = None;
        self.ids.before_first()
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.current = None;
        self.ids.after_last()
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        while self.ids.next()? {
            if let Some(e) = self.partition.fetch(self.ids.get()?) {
                self.current = Some(e);
                return Ok(true);
            }
        }
        self.current = None;
        Ok(false)
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        while self.ids.previous()? {
            if let Some(e) = self.partition.fetch(self.ids.get()?) {
                self.current = Some(e);
                return Ok(true);
            }
        }
        self.current = None;
        Ok(false)
    }

    fn available(&self) -> bool {
        self.ids.available() && self.current.is_some()
    }

    fn get(&self) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        if self.ids.is_closed() {
            return Err(OperationError::CursorClosed);
        }
        self.current
            .clone()
            .ok_or(OperationError::InvalidCursorPosition)
    }

    fn close(&mut self) {
        self.current = None;
        self.ids.close()
    }

    fn is_closed(&self) -> bool {
        self.ids.is_closed()
    }
}

/// Walks several cursors one after the other.
pub struct ChainCursor<T> {
    children: Vec<Box<dyn Cursor<Item = T>>>,
    pos: usize,
    monitor: DefaultClosureMonitor,
}

impl<T> ChainCursor<T> {
    pub fn new(children: Vec<Box<dyn Cursor<Item = T>>>) -> Self {
        ChainCursor {
            children,
            pos: 0,
            monitor: DefaultClosureMonitor::default(),
        }
    }
}

impl<T: Send> Cursor for ChainCursor<T> {
    type Item = T;

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
                return Ok(true);
            }
            self.pos += 1;
            if let Some(c) = self.children.get_mut(self.pos) {
                c.before_first()?;
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
                return Ok(true);
            }
            if self.pos == 0 {
                return Ok(false);
            }
            self.pos -= 1;
            if let Some(c) = self.children.get_mut(self.pos) {
                c.after_last()?;
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

    fn get(&self) -> Result<T, OperationError> {
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

/// A check applied to each entry on its way out of a search. A filter may rewrite
/// the entry it is given, for example to add or hide attributes.
pub trait EntryFilter: Send {
    fn accept(&self, entry: &mut EntrySealedCommitted) -> Result<bool, OperationError>;
}

impl<F> EntryFilter for F
where
    F: Fn(&mut EntrySealedCommitted) -> Result<bool, OperationError> + Send,
{
    fn accept(&self, entry: &mut EntrySealedCommitted) -> Result<bool, OperationError> {
        self(entry)
    }
}

/// The cursor a search hands back. Entries pass every registered filter in order,
/// then are reduced to the requested attributes. Size and time limits are enforced
/// as the cursor advances.
pub struct EntryFilteringCursor {
    source: EntryCursor,
    filters: Vec<Box<dyn EntryFilter>>,
    attrs: AttributeSelection,
    types_only: bool,
    size_limit: usize,
    // Distinct entries handed out, and how far forward the cursor currently is.
    returned: usize,
    position: usize,
    monitor: Box<dyn ClosureMonitor>,
    current: Option<EntrySealedCommitted>,
}

impl EntryFilteringCursor {
    pub fn new(source: EntryCursor, attrs: AttributeSelection, types_only: bool) -> Self {
        EntryFilteringCursor {
            source,
            filters: Vec::new(),
            attrs,
            types_only,
            size_limit: 0,
            returned: 0,
            position: 0,
            monitor: Box::new(DefaultClosureMonitor::default()),
            current: None,
        }
    }

    pub fn empty() -> Self {
        EntryFilteringCursor::new(
            Box::new(ListCursor::<Arc<EntrySealedCommitted>>::empty()),
            AttributeSelection::all_user(),
            false,
        )
    }

    pub fn add_filter(&mut self, filter: Box<dyn EntryFilter>) {
        self.filters.push(filter);
    }

    pub fn attributes(&self) -> &AttributeSelection {
        &self.attrs
    }

    /// Zero means unlimited.
    pub fn set_size_limit(&mut self, limit: usize) {
        self.size_limit = limit;
    }

    /// Zero means unlimited.
    pub fn set_time_limit(&mut self, limit: Duration) {
        if !limit.is_zero() {
            self.monitor = Box::new(TimeLimitMonitor::new(limit));
        }
    }

    /// Fails once the monitor reports the cursor closed, for example when the time
    /// limit has passed. The source is released at that point.
    fn ensure_open(&mut self) -> Result<(), OperationError> {
        if let Err(e) = self.monitor.check_not_closed() {
            self.current = None;
            if !self.source.is_closed() {
                self.source.close_with(e.clone());
            }
            return Err(e);
        }
        Ok(())
    }

    fn prepare(&self, stored: &EntrySealedCommitted) -> Result<Option<EntrySealedCommitted>, OperationError> {
        let mut e = stored.clone();
        for f in self.filters.iter() {
            if !f.accept(&mut e)? {
                return Ok(None);
            }
        }
        e.reduce_attributes(&self.attrs, self.types_only);
        Ok(Some(e))
    }
}

impl Cursor for EntryFilteringCursor {
    type Item = EntrySealedCommitted;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.ensure_open()?;
        self.current = None;
        self.returned = 0;
        self.position = 0;
        self.source.before_first()
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.ensure_open()?;
        self.current = None;
        self.position = self.returned + 1;
        self.source.after_last()
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.ensure_open()?;
        while self.source.next()? {
            self.ensure_open()?;
            let stored = self.source.get()?;
            if let Some(e) = self.prepare(&stored)? {
                // Only entries not handed out before count against the limit.
                if self.position >= self.returned {
                    if self.size_limit > 0 && self.returned >= self.size_limit {
                        request_warn!(limit = self.size_limit, "search size limit exceeded");
                        self.close_with(OperationError::SizeLimitExceeded);
                        return Err(OperationError::SizeLimitExceeded);
                    }
                    self.returned += 1;
                }
                self.position += 1;
                self.current = Some(e);
                return Ok(true);
            }
        }
        self.current = None;
        self.position = self.returned + 1;
        Ok(false)
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.ensure_open()?;
        while self.source.previous()? {
            self.ensure_open()?;
            let stored = self.source.get()?;
            if let Some(e) = self.prepare(&stored)? {
                self.position = self.position.saturating_sub(1);
                self.current = Some(e);
                return Ok(true);
            }
        }
        self.current = None;
        self.position = 0;
        Ok(false)
    }

    fn available(&self) -> bool {
        !self.monitor.is_closed() && self.current.is_some()
    }

    fn get(&self) -> Result<EntrySealedCommitted, OperationError> {
        if self.monitor.is_closed() {
            return Err(self
                .monitor
                .cause()
                .cloned()
                .unwrap_or(OperationError::CursorClosed));
        }
        self.current
            .clone()
            .ok_or(OperationError::InvalidCursorPosition)
    }

    fn close(&mut self) {
        self.current = None;
        self.monitor.close(None);
        self.source.close();
    }

    fn close_with(&mut self, cause: OperationError) {
        self.current = None;
        self.monitor.close(Some(cause));
        self.source.close();
    }

    fn is_closed(&self) -> bool {
        self.monitor.is_closed()
    }
}
