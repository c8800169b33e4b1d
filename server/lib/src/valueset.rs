use std::collections::BTreeSet;

use crate::value::Value;

/// The values of one attribute. Values are kept ordered by their normalised form, so
/// two values equal under the equality rule can not coexist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSet {
    inner: BTreeSet<Value>,
}

impl ValueSet {
    pub fn new() -> Self {
        ValueSet::default()
    }

    /// Returns true if the value was not already present.
    pub fn insert(&mut self, v: Value) -> bool {
        self.inner.insert(v)
    }

    /// Returns true if the value was present.
    pub fn remove(&mut self, v: &Value) -> bool {
        self.inner.remove(v)
    }

    pub fn contains(&self, v: &Value) -> bool {
        self.inner.contains(v)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.inner.iter()
    }

    pub fn first(&self) -> Option<&Value> {
        self.inner.iter().next()
    }

    pub fn clear(&mut self) {
        self.inner.clear()
    }

    /// Values present here that are not present in `other`.
    pub fn difference<'a>(&'a self, other: &'a ValueSet) -> impl Iterator<Item = &'a Value> {
        self.inner.difference(&other.inner)
    }
}

impl FromIterator<Value> for ValueSet {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        ValueSet {
            inner: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ValueSet {
    type Item = Value;
    type IntoIter = std::collections::btree_set::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::ValueSet;
    use crate::value::{MatchingRule, Value};

    #[test]
    fn test_valueset_dedup_by_norm() {
        let mut vs = ValueSet::new();
        assert!(vs.insert(Value::from_rule(MatchingRule::CaseIgnoreMatch, "Alice").unwrap()));
        assert!(!vs.insert(Value::from_rule(MatchingRule::CaseIgnoreMatch, "ALICE").unwrap()));
        assert_eq!(vs.len(), 1);
        // The first provided form is kept.
        assert_eq!(vs.first().and_then(|v| v.as_str()), Some("Alice"));
    }
}
