//! The access control decision function. The tuples that may apply to an entry are
//! passed through a fixed sequence of filters, each of which can only remove tuples.
//! Access is granted when something survives and every survivor is a grant.

use std::collections::BTreeSet;

use super::tuple::{AciTuple, MicroOperation, ProtectedItem, UserClass};
use crate::prelude::*;
use crate::schema::SchemaAttribute;

/// The requesting user as the decision function sees it.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    /// Normalised. `None` for anonymous sessions.
    pub dn: Option<Dn>,
    /// Normalised names of the groups the user is a member of.
    pub groups: BTreeSet<String>,
    pub auth_level: AuthenticationLevel,
}

impl UserContext {
    fn dn_norm(&self) -> Option<String> {
        self.dn.as_ref().map(|d| d.to_norm_string())
    }
}

/// One access check: the operations requested on an entry, or on one attribute or one
/// value of it.
pub struct AccessRequest<'a, STATE> {
    pub user: &'a UserContext,
    /// For value additions this is the entry as it will be after the change.
    pub entry: &'a Entry<STATE>,
    pub attr: Option<&'a SchemaAttribute>,
    pub value: Option<&'a Value>,
    pub operations: &'a [MicroOperation],
    /// Existing immediate subordinates of the parent, for entry additions.
    pub imm_sub_count: usize,
}

impl<'a, STATE> AccessRequest<'a, STATE> {
    pub fn entry(user: &'a UserContext, entry: &'a Entry<STATE>, operations: &'a [MicroOperation]) -> Self {
        AccessRequest {
            user,
            entry,
            attr: None,
            value: None,
            operations,
            imm_sub_count: 0,
        }
    }

    pub fn attribute(
        user: &'a UserContext,
        entry: &'a Entry<STATE>,
        attr: &'a SchemaAttribute,
        value: Option<&'a Value>,
        operations: &'a [MicroOperation],
    ) -> Self {
        AccessRequest {
            user,
            entry,
            attr: Some(attr),
            value,
            operations,
            imm_sub_count: 0,
        }
    }

    pub fn with_imm_sub_count(mut self, count: usize) -> Self {
        self.imm_sub_count = count;
        self
    }

    fn requests(&self, op: MicroOperation) -> bool {
        self.operations.contains(&op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcdfFilter {
    RelatedUserClass,
    RelatedProtectedItem,
    MaxValueCount,
    MaxImmSub,
    RestrictedBy,
    MicroOperation,
    HighestPrecedence,
    MostSpecificUserClass,
    MostSpecificProtectedItem,
}

/// The order is fixed. Precedence and specificity assume the scope filters already ran.
pub const ACDF_FILTERS: [AcdfFilter; 9] = [
    AcdfFilter::RelatedUserClass,
    AcdfFilter::RelatedProtectedItem,
    AcdfFilter::MaxValueCount,
    AcdfFilter::MaxImmSub,
    AcdfFilter::RestrictedBy,
    AcdfFilter::MicroOperation,
    AcdfFilter::HighestPrecedence,
    AcdfFilter::MostSpecificUserClass,
    AcdfFilter::MostSpecificProtectedItem,
];

fn user_class_matches<STATE>(uc: &UserClass, user: &UserContext, entry: &Entry<STATE>) -> bool {
    match uc {
        UserClass::AllUsers => true,
        UserClass::ThisEntry => user.dn.as_ref() == Some(entry.dn()),
        UserClass::ParentOfEntry => user
            .dn
            .as_ref()
            .map(|dn| dn.is_parent_of(entry.dn()))
            .unwrap_or(false),
        UserClass::Name(names) => user
            .dn_norm()
            .map(|dn| names.contains(&dn))
            .unwrap_or(false),
        UserClass::UserGroup(groups) => groups.iter().any(|g| user.groups.contains(g)),
        UserClass::Subtree(subtrees) => user
            .dn
            .as_ref()
            .map(|dn| subtrees.iter().any(|s| s.contains_dn(dn)))
            .unwrap_or(false),
    }
}

fn is_related<STATE>(tuple: &AciTuple, req: &AccessRequest<'_, STATE>) -> bool {
    tuple
        .user_classes
        .iter()
        .any(|uc| user_class_matches(uc, req.user, req.entry))
}

fn attr_count<STATE>(entry: &Entry<STATE>, oid: &str) -> usize {
    entry.get_ava(oid).map(|a| a.len()).unwrap_or(0)
}

impl AcdfFilter {
    pub fn filter<STATE>(self, mut tuples: Vec<AciTuple>, req: &AccessRequest<'_, STATE>) -> Vec<AciTuple> {
        if tuples.is_empty() {
            return tuples;
        }
        match self {
            AcdfFilter::RelatedUserClass => {
                let level = req.user.auth_level;
                tuples.retain(|t| {
                    if t.grant {
                        is_related(t, req) && level >= t.auth_level
                    } else {
                        // A deny the user is not strong enough to escape still applies.
                        is_related(t, req) || level < t.auth_level
                    }
                });
            }
            AcdfFilter::RelatedProtectedItem => {
                let user_dn = req.user.dn.as_ref();
                tuples.retain(|t| {
                    t.protected_items
                        .iter()
                        .any(|pi| pi.covers(user_dn, req.entry, req.attr, req.value))
                });
            }
            AcdfFilter::MaxValueCount => {
                let (Some(sa), Some(_)) = (req.attr, req.value) else {
                    return tuples;
                };
                let count = attr_count(req.entry, &sa.oid);
                tuples.retain(|t| {
                    !t.grant
                        || !t.protected_items.iter().any(|pi| match pi {
                            ProtectedItem::MaxValueCount(elems) => elems
                                .iter()
                                .any(|(oid, max)| *oid == sa.oid && count > *max),
                            _ => false,
                        })
                });
            }
            AcdfFilter::MaxImmSub => {
                if req.attr.is_some() || !req.requests(MicroOperation::Add) {
                    return tuples;
                }
                tuples.retain(|t| {
                    !t.grant
                        || !t.protected_items.iter().any(|pi| {
                            matches!(pi, ProtectedItem::MaxImmSub(max) if req.imm_sub_count >= *max)
                        })
                });
            }
            AcdfFilter::RestrictedBy => {
                let (Some(sa), Some(v)) = (req.attr, req.value) else {
                    return tuples;
                };
                let Some(s) = v.as_str() else {
                    return tuples;
                };
                tuples.retain(|t| {
                    !t.grant
                        || !t.protected_items.iter().any(|pi| match pi {
                            ProtectedItem::RestrictedBy(elems) => elems.iter().any(|(oid, values_in)| {
                                *oid == sa.oid && !req.entry.attribute_equality_str(values_in, s)
                            }),
                            _ => false,
                        })
                });
            }
            AcdfFilter::MicroOperation => {
                tuples.retain(|t| req.operations.iter().any(|op| t.micro_operations.contains(op)));
            }
            AcdfFilter::HighestPrecedence => {
                if let Some(max) = tuples.iter().map(|t| t.precedence).max() {
                    tuples.retain(|t| t.precedence == max);
                }
            }
            AcdfFilter::MostSpecificUserClass => {
                if let Some(max) = tuples.iter().map(AciTuple::user_specificity).max() {
                    tuples.retain(|t| t.user_specificity() == max);
                }
            }
            AcdfFilter::MostSpecificProtectedItem => {
                if let Some(max) = tuples.iter().map(AciTuple::item_specificity).max() {
                    tuples.retain(|t| t.item_specificity() == max);
                }
            }
        }
        tuples
    }
}

/// Grant only if at least one tuple survives and all survivors are grants.
pub fn decide<STATE>(tuples: &[AciTuple], req: &AccessRequest<'_, STATE>) -> bool {
    let survivors = ACDF_FILTERS
        .iter()
        .fold(tuples.to_vec(), |acc, f| f.filter(acc, req));
    let granted = !survivors.is_empty() && survivors.iter().all(|t| t.grant);
    security_access!(
        entry = %req.entry.dn(),
        attr = req.attr.map(|a| a.name()),
        operations = ?req.operations,
        survivors = survivors.len(),
        granted,
        "access decision"
    );
    granted
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{decide, AccessRequest, AcdfFilter, UserContext};
    use crate::prelude::*;
    use crate::server::access::tuple::{AciTuple, MicroOperation, ProtectedItem, UserClass};

    fn tuple(grant: bool, precedence: u8, items: Vec<ProtectedItem>) -> AciTuple {
        AciTuple {
            user_classes: vec![UserClass::AllUsers],
            auth_level: AuthenticationLevel::None,
            protected_items: items,
            micro_operations: [MicroOperation::Read, MicroOperation::Add].into_iter().collect(),
            grant,
            precedence,
        }
    }

    fn person(schema: &Schema, cns: &[&str]) -> EntrySealedCommitted {
        let mut ei = entry_init!(
            "cn=test,ou=system",
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_SN, "TEST")
        );
        for cn in cns {
            ei.add_ava(ATTR_CN, *cn);
        }
        ei.into_entry(&schema.read()).unwrap().into_committed(1)
    }

    #[test]
    fn test_acdf_unanimity() {
        let schema = Schema::new().unwrap();
        let e = person(&schema, &["test"]);
        let user = UserContext::default();
        let req = AccessRequest::entry(&user, &e, &[MicroOperation::Read]);

        assert!(!decide(&[], &req));
        assert!(decide(&[tuple(true, 10, vec![ProtectedItem::Entry])], &req));
        assert!(!decide(
            &[
                tuple(true, 10, vec![ProtectedItem::Entry]),
                tuple(false, 10, vec![ProtectedItem::Entry])
            ],
            &req
        ));
        // A lower precedence deny is filtered out before the decision.
        assert!(decide(
            &[
                tuple(true, 20, vec![ProtectedItem::Entry]),
                tuple(false, 10, vec![ProtectedItem::Entry])
            ],
            &req
        ));
        // Nothing covers the entry itself.
        assert!(!decide(
            &[tuple(true, 10, vec![ProtectedItem::AllUserAttributeTypes])],
            &req
        ));
    }

    #[test]
    fn test_acdf_highest_precedence_idempotent() {
        let schema = Schema::new().unwrap();
        let e = person(&schema, &["test"]);
        let user = UserContext::default();
        let req = AccessRequest::entry(&user, &e, &[MicroOperation::Read]);
        let tuples = vec![
            tuple(true, 5, vec![ProtectedItem::Entry]),
            tuple(false, 9, vec![ProtectedItem::Entry]),
            tuple(true, 9, vec![ProtectedItem::Entry]),
            tuple(true, 1, vec![ProtectedItem::Entry]),
        ];
        let once = AcdfFilter::HighestPrecedence.filter(tuples, &req);
        let twice = AcdfFilter::HighestPrecedence.filter(once.clone(), &req);
        assert_eq!(once.len(), 2);
        let precedences = |ts: &[AciTuple]| ts.iter().map(|t| (t.precedence, t.grant)).collect::<Vec<_>>();
        assert_eq!(precedences(&once), precedences(&twice));
    }

    #[test]
    fn test_acdf_max_value_count() {
        let schema = Schema::new().unwrap();
        let e = person(&schema, &["a", "b", "c"]);
        let user = UserContext::default();
        let (sa, v) = schema.read().value_for(ATTR_CN, "c").unwrap();
        let req = AccessRequest::attribute(&user, &e, &sa, Some(&v), &[MicroOperation::Add]);
        let cn_oid = sa.oid.clone();

        let tuples = vec![tuple(
            true,
            10,
            vec![ProtectedItem::MaxValueCount(vec![(cn_oid.clone(), 2)])],
        )];
        assert!(AcdfFilter::MaxValueCount.filter(tuples, &req).is_empty());

        // Within the ceiling the grant stays.
        let tuples = vec![tuple(
            true,
            10,
            vec![ProtectedItem::MaxValueCount(vec![(cn_oid.clone(), 3)])],
        )];
        assert_eq!(AcdfFilter::MaxValueCount.filter(tuples, &req).len(), 1);

        // Any value scoped operation is held to the ceiling, not only additions.
        let read = AccessRequest::attribute(&user, &e, &sa, Some(&v), &[MicroOperation::Read]);
        let tuples = vec![tuple(
            true,
            10,
            vec![ProtectedItem::MaxValueCount(vec![(cn_oid.clone(), 2)])],
        )];
        assert!(AcdfFilter::MaxValueCount.filter(tuples, &read).is_empty());

        // Attribute scoped requests are left alone.
        let bare = AccessRequest::attribute(&user, &e, &sa, None, &[MicroOperation::Read]);
        let tuples = vec![tuple(
            true,
            10,
            vec![ProtectedItem::MaxValueCount(vec![(cn_oid, 2)])],
        )];
        assert_eq!(AcdfFilter::MaxValueCount.filter(tuples, &bare).len(), 1);
    }

    #[test]
    fn test_acdf_range_of_values_scope() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();
        let e = person(&schema, &["alpha", "beta"]);
        let user = UserContext::default();
        let range = || {
            vec![tuple(
                true,
                10,
                vec![ProtectedItem::RangeOfValues(filter_valid!(&schema_ro, "(cn=b*)"))],
            )]
        };
        fn related<STATE>(tuples: Vec<AciTuple>, req: &AccessRequest<'_, STATE>) -> usize {
            AcdfFilter::RelatedProtectedItem.filter(tuples, req).len()
        }

        // The entry and bare attribute scopes are never covered.
        assert_eq!(related(range(), &AccessRequest::entry(&user, &e, &[MicroOperation::Read])), 0);
        let (cn, beta) = schema_ro.value_for(ATTR_CN, "beta").unwrap();
        assert_eq!(
            related(range(), &AccessRequest::attribute(&user, &e, &cn, None, &[MicroOperation::Read])),
            0
        );

        // Only the value under test is matched, not the rest of the entry.
        assert_eq!(
            related(range(), &AccessRequest::attribute(&user, &e, &cn, Some(&beta), &[MicroOperation::Read])),
            1
        );
        let (_, alpha) = schema_ro.value_for(ATTR_CN, "alpha").unwrap();
        assert_eq!(
            related(range(), &AccessRequest::attribute(&user, &e, &cn, Some(&alpha), &[MicroOperation::Read])),
            0
        );
        let (sn, test) = schema_ro.value_for(ATTR_SN, "TEST").unwrap();
        assert_eq!(
            related(range(), &AccessRequest::attribute(&user, &e, &sn, Some(&test), &[MicroOperation::Read])),
            0
        );
    }

    #[test]
    fn test_acdf_related_user_class() {
        let schema = Schema::new().unwrap();
        let e = person(&schema, &["test"]);
        let anon = UserContext::default();
        let this = UserContext {
            dn: Some(e.dn().clone()),
            groups: BTreeSet::new(),
            auth_level: AuthenticationLevel::Simple,
        };

        let mut self_read = tuple(true, 10, vec![ProtectedItem::Entry]);
        self_read.user_classes = vec![UserClass::ThisEntry];
        self_read.auth_level = AuthenticationLevel::Simple;

        let req = AccessRequest::entry(&anon, &e, &[MicroOperation::Read]);
        assert!(!decide(&[self_read.clone()], &req));
        let req = AccessRequest::entry(&this, &e, &[MicroOperation::Read]);
        assert!(decide(&[self_read.clone()], &req));

        // A deny needing strong authentication applies to everyone weaker.
        let mut strong_deny = tuple(false, 10, vec![ProtectedItem::Entry]);
        strong_deny.user_classes = vec![UserClass::Name(
            ["cn=other".to_string()].into_iter().collect(),
        )];
        strong_deny.auth_level = AuthenticationLevel::Strong;
        let out = AcdfFilter::RelatedUserClass.filter(vec![strong_deny], &req);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_acdf_most_specific() {
        let schema = Schema::new().unwrap();
        let e = person(&schema, &["test"]);
        let user = UserContext {
            dn: Some(e.dn().clone()),
            groups: BTreeSet::new(),
            auth_level: AuthenticationLevel::Simple,
        };
        let (sa, v) = schema.read().value_for(ATTR_CN, "test").unwrap();
        let req = AccessRequest::attribute(&user, &e, &sa, Some(&v), &[MicroOperation::Read]);

        let all = tuple(false, 10, vec![ProtectedItem::AllUserAttributeTypesAndValues]);
        let mut specific = tuple(
            true,
            10,
            vec![ProtectedItem::AllAttributeValues(
                [sa.oid.clone()].into_iter().collect(),
            )],
        );
        specific.user_classes = vec![UserClass::ThisEntry];
        assert!(decide(&[all, specific], &req));
    }
}
