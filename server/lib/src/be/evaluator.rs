//! Evaluators decide whether one candidate id satisfies a filter component or a search
//! scope. Cursors use them to check the parts of a search their index did not answer.

use crate::be::BTreePartition;
use crate::event::SearchScope;
use crate::filter::FilterResolved;

#[derive(Debug, Clone)]
pub struct ScopeEvaluator {
    pub base: u64,
    pub scope: SearchScope,
    /// Follow aliases while searching. Aliases themselves are never in scope then.
    pub deref: bool,
}

impl ScopeEvaluator {
    pub fn new(base: u64, scope: SearchScope, deref: bool) -> Self {
        ScopeEvaluator { base, scope, deref }
    }

    pub fn contains(&self, p: &BTreePartition, id: u64) -> bool {
        if self.deref && p.is_alias_id(id) {
            return false;
        }
        match self.scope {
            SearchScope::Base => id == self.base,
            SearchScope::OneLevel => {
                p.parent_of(id) == Some(self.base)
                    || (self.deref && p.one_alias_targets(self.base).contains(&id))
            }
            SearchScope::Subtree => {
                p.in_subtree(self.base, id)
                    || (self.deref
                        && p.sub_alias_targets(self.base)
                            .iter()
                            .any(|t| p.in_subtree(*t, id)))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Evaluator {
    /// A filter component matched against the stored entry.
    Filter(FilterResolved),
    Scope(ScopeEvaluator),
}

impl Evaluator {
    pub fn evaluate(&self, p: &BTreePartition, id: u64) -> bool {
        match self {
            Evaluator::Filter(f) => p
                .fetch(id)
                .map(|e| e.entry_match_resolved(f))
                .unwrap_or(false),
            Evaluator::Scope(s) => s.contains(p, id),
        }
    }
}
