//! Keys of the structural indexes.

use std::cmp::Ordering;
use std::fmt;

use crate::prelude::*;

/// The structural key of an entry: the id of its parent and its RDN. The suffix entry
/// of a partition has parent `0` and holds every RDN of the suffix.
///
/// Keys order by the number of RDNs, then by each RDN under its equality rule, then by
/// the parent id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParentIdAndRdn {
    parent_id: u64,
    rdns: Vec<Rdn>,
}

impl ParentIdAndRdn {
    pub fn new(parent_id: u64, rdn: Rdn) -> Self {
        ParentIdAndRdn {
            parent_id,
            rdns: vec![rdn],
        }
    }

    /// The key of a partition suffix entry.
    pub fn suffix(suffix: &Dn) -> Self {
        ParentIdAndRdn {
            parent_id: ROOT_PARENT_ID,
            rdns: suffix.rdns().to_vec(),
        }
    }

    pub fn parent_id(&self) -> u64 {
        self.parent_id
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn is_suffix(&self) -> bool {
        self.parent_id == ROOT_PARENT_ID
    }
}

impl PartialOrd for ParentIdAndRdn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParentIdAndRdn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rdns
            .len()
            .cmp(&other.rdns.len())
            .then_with(|| self.rdns.iter().cmp(other.rdns.iter()))
            .then_with(|| self.parent_id.cmp(&other.parent_id))
    }
}

impl fmt::Display for ParentIdAndRdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, ", self.parent_id)?;
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(&rdn.to_norm_string())?;
        }
        f.write_str(">")
    }
}

/// The key of the one level index. Children of one parent are contiguous and held in
/// RDN order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildKey {
    pub parent_id: u64,
    pub rdn: Option<Rdn>,
}

impl ChildKey {
    pub fn new(parent_id: u64, rdn: Rdn) -> Self {
        ChildKey {
            parent_id,
            rdn: Some(rdn),
        }
    }

    /// Sorts before every child of `parent_id`.
    pub fn first_of(parent_id: u64) -> Self {
        ChildKey {
            parent_id,
            rdn: None,
        }
    }
}

/// The parent id of a partition suffix entry.
pub const ROOT_PARENT_ID: u64 = 0;

#[cfg(test)]
mod tests {
    use super::{ChildKey, ParentIdAndRdn};
    use crate::prelude::*;

    #[test]
    fn test_parent_id_and_rdn_ordering() {
        let k = |p: u64, r: &str| ParentIdAndRdn::new(p, Rdn::parse(r).unwrap());

        // RDN before parent.
        assert!(k(9, "cn=a") < k(1, "cn=b"));
        assert!(k(1, "cn=a") < k(2, "cn=a"));
        // Fewer RDN assertions sort first.
        assert!(k(1, "cn=z") < k(1, "cn=a+sn=a"));
        // The suffix key carries all of the suffix RDNs, so it sorts after single
        // RDN keys.
        let suffix = ParentIdAndRdn::suffix(&Dn::parse("dc=example,dc=com").unwrap());
        assert!(suffix.is_suffix());
        assert!(k(1, "dc=zzz") < suffix);
    }

    #[test]
    fn test_child_key_groups_by_parent() {
        let k = |p: u64, r: &str| ChildKey::new(p, Rdn::parse(r).unwrap());
        assert!(ChildKey::first_of(2) < k(2, "cn=a"));
        assert!(k(2, "cn=a") < k(2, "cn=b"));
        assert!(k(2, "cn=z") < ChildKey::first_of(3));
        assert!(k(1, "cn=z") < k(2, "cn=a"));
    }
}
