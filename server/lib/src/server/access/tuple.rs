//! ACI tuples: one grant or deny of a set of micro operations, for a set of user
//! classes, over a set of protected items. Tuples are built once from an ACI item and
//! never altered afterwards; the decision function only removes tuples from the set it
//! evaluates.

use std::collections::BTreeSet;

use crate::prelude::*;
use crate::schema::SchemaAttribute;
use crate::subtree::{Refinement, ResolvedSubtree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MicroOperation {
    Add,
    DiscloseOnError,
    Read,
    Remove,
    Browse,
    Export,
    Import,
    Modify,
    Rename,
    ReturnDn,
    Compare,
    FilterMatch,
    Invoke,
}

impl MicroOperation {
    /// Parse `grantRead` or `denyRead` style permissions into the operation and whether
    /// it is a grant.
    pub fn parse_permission(s: &str) -> Option<(MicroOperation, bool)> {
        let (grant, op) = if let Some(op) = s.strip_prefix("grant") {
            (true, op)
        } else if let Some(op) = s.strip_prefix("deny") {
            (false, op)
        } else {
            return None;
        };
        let op = match op.to_ascii_lowercase().as_str() {
            "add" => MicroOperation::Add,
            "discloseonerror" => MicroOperation::DiscloseOnError,
            "read" => MicroOperation::Read,
            "remove" => MicroOperation::Remove,
            "browse" => MicroOperation::Browse,
            "export" => MicroOperation::Export,
            "import" => MicroOperation::Import,
            "modify" => MicroOperation::Modify,
            "rename" => MicroOperation::Rename,
            "returndn" => MicroOperation::ReturnDn,
            "compare" => MicroOperation::Compare,
            "filtermatch" => MicroOperation::FilterMatch,
            "invoke" => MicroOperation::Invoke,
            _ => return None,
        };
        Some((op, grant))
    }
}

/// Who a tuple applies to. Names are held normalised.
#[derive(Debug, Clone)]
pub enum UserClass {
    AllUsers,
    ThisEntry,
    ParentOfEntry,
    Name(BTreeSet<String>),
    UserGroup(BTreeSet<String>),
    Subtree(Vec<ResolvedSubtree>),
}

impl UserClass {
    /// Name and ThisEntry are the most specific classes, then UserGroup and Subtree.
    pub(crate) fn specificity(&self) -> u8 {
        match self {
            UserClass::Name(_) | UserClass::ThisEntry => 2,
            UserClass::UserGroup(_) | UserClass::Subtree(_) => 1,
            UserClass::AllUsers | UserClass::ParentOfEntry => 0,
        }
    }
}

/// What a tuple protects. Attribute types are held as OIDs.
#[derive(Debug, Clone)]
pub enum ProtectedItem {
    Entry,
    AllUserAttributeTypes,
    AllUserAttributeTypesAndValues,
    AttributeType(BTreeSet<AttrString>),
    AllAttributeValues(BTreeSet<AttrString>),
    SelfValue(BTreeSet<AttrString>),
    AttributeValue(Vec<(AttrString, Value)>),
    MaxValueCount(Vec<(AttrString, usize)>),
    MaxImmSub(usize),
    /// Values of the first type must appear among the values of the second.
    RestrictedBy(Vec<(AttrString, AttrString)>),
    Classes(Refinement),
    RangeOfValues(Filter<FilterValid>),
}

impl ProtectedItem {
    pub(crate) fn specificity(&self) -> u8 {
        match self {
            ProtectedItem::AttributeType(_)
            | ProtectedItem::AllAttributeValues(_)
            | ProtectedItem::SelfValue(_)
            | ProtectedItem::AttributeValue(_) => 2,
            ProtectedItem::AllUserAttributeTypes | ProtectedItem::AllUserAttributeTypesAndValues => 1,
            _ => 0,
        }
    }

    /// Does this item cover the entry, attribute or value being accessed.
    pub(crate) fn covers<STATE>(
        &self,
        user_dn: Option<&Dn>,
        entry: &Entry<STATE>,
        attr: Option<&SchemaAttribute>,
        value: Option<&Value>,
    ) -> bool {
        match (self, attr) {
            (ProtectedItem::Entry, None) => true,
            (ProtectedItem::MaxImmSub(_), None) => true,
            (ProtectedItem::AllUserAttributeTypes, Some(sa))
            | (ProtectedItem::AllUserAttributeTypesAndValues, Some(sa)) => !sa.is_operational(),
            (ProtectedItem::AttributeType(set), Some(sa))
            | (ProtectedItem::AllAttributeValues(set), Some(sa)) => set.contains(&sa.oid),
            (ProtectedItem::SelfValue(set), Some(sa)) => {
                set.contains(&sa.oid)
                    && match (value, user_dn) {
                        (Some(v), Some(dn)) => v.norm_str() == Some(dn.to_norm_string().as_str()),
                        _ => false,
                    }
            }
            (ProtectedItem::AttributeValue(avas), Some(sa)) => match value {
                Some(v) => avas.iter().any(|(oid, av)| *oid == sa.oid && av == v),
                None => false,
            },
            (ProtectedItem::MaxValueCount(elems), Some(sa)) => {
                elems.iter().any(|(oid, _)| *oid == sa.oid)
            }
            (ProtectedItem::RestrictedBy(elems), Some(sa)) => {
                elems.iter().any(|(oid, _)| *oid == sa.oid)
            }
            (ProtectedItem::Classes(refinement), _) => refinement.matches(entry),
            (ProtectedItem::RangeOfValues(filter), Some(sa)) => value
                .map(|v| filter.matches_value(sa, v))
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AciTuple {
    pub user_classes: Vec<UserClass>,
    pub auth_level: AuthenticationLevel,
    pub protected_items: Vec<ProtectedItem>,
    pub micro_operations: BTreeSet<MicroOperation>,
    pub grant: bool,
    pub precedence: u8,
}

impl AciTuple {
    pub fn user_specificity(&self) -> u8 {
        self.user_classes
            .iter()
            .map(UserClass::specificity)
            .max()
            .unwrap_or(0)
    }

    pub fn item_specificity(&self) -> u8 {
        self.protected_items
            .iter()
            .map(ProtectedItem::specificity)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::MicroOperation;

    #[test]
    fn test_parse_permission() {
        assert_eq!(
            MicroOperation::parse_permission("grantRead"),
            Some((MicroOperation::Read, true))
        );
        assert_eq!(
            MicroOperation::parse_permission("denyDiscloseOnError"),
            Some((MicroOperation::DiscloseOnError, false))
        );
        assert_eq!(
            MicroOperation::parse_permission("grantReturnDN"),
            Some((MicroOperation::ReturnDn, true))
        );
        assert_eq!(MicroOperation::parse_permission("allowRead"), None);
        assert_eq!(MicroOperation::parse_permission("grantFly"), None);
    }
}
