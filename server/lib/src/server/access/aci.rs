//! ACI items as stored in `prescriptiveACI`, `entryACI` and `subentryACI`.
//!
//! Items are JSON in either the user-first or the item-first form:
//!
//! ```json
//! {
//!   "identificationTag": "allowSelfRead",
//!   "precedence": 10,
//!   "authenticationLevel": "simple",
//!   "userFirst": {
//!     "userClasses": { "thisEntry": true },
//!     "userPermissions": [
//!       {
//!         "protectedItems": { "entry": true, "allUserAttributeTypesAndValues": true },
//!         "grantsAndDenials": ["grantRead", "grantBrowse", "grantReturnDN"]
//!       }
//!     ]
//!   }
//! }
//! ```
//!
//! Each permission becomes at most two tuples, one for its grants and one for its
//! denials.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::tuple::{AciTuple, MicroOperation, ProtectedItem, UserClass};
use crate::prelude::*;
use crate::schema::SchemaTransaction;
use crate::subtree::{Refinement, SubtreeSpecification};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserClasses {
    #[serde(default)]
    pub all_users: bool,
    #[serde(default)]
    pub this_entry: bool,
    #[serde(default)]
    pub parent_of_entry: bool,
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub user_group: Vec<String>,
    #[serde(default)]
    pub subtree: Vec<SubtreeSpecification>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttributeValueAssertion {
    #[serde(rename = "type")]
    pub attr: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MaxValueCountElem {
    #[serde(rename = "type")]
    pub attr: String,
    pub max_count: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RestrictedByElem {
    #[serde(rename = "type")]
    pub attr: String,
    pub values_in: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProtectedItems {
    #[serde(default)]
    pub entry: bool,
    #[serde(default)]
    pub all_user_attribute_types: bool,
    #[serde(default)]
    pub all_user_attribute_types_and_values: bool,
    #[serde(default)]
    pub attribute_type: Vec<String>,
    #[serde(default)]
    pub all_attribute_values: Vec<String>,
    #[serde(default)]
    pub self_value: Vec<String>,
    #[serde(default)]
    pub attribute_value: Vec<AttributeValueAssertion>,
    #[serde(default)]
    pub max_value_count: Vec<MaxValueCountElem>,
    #[serde(default)]
    pub max_imm_sub: Option<usize>,
    #[serde(default)]
    pub restricted_by: Vec<RestrictedByElem>,
    #[serde(default)]
    pub classes: Option<Refinement>,
    #[serde(default)]
    pub range_of_values: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserPermission {
    #[serde(default)]
    pub precedence: Option<u8>,
    pub protected_items: ProtectedItems,
    pub grants_and_denials: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ItemPermission {
    #[serde(default)]
    pub precedence: Option<u8>,
    pub user_classes: UserClasses,
    pub grants_and_denials: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserFirst {
    pub user_classes: UserClasses,
    pub user_permissions: Vec<UserPermission>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ItemFirst {
    pub protected_items: ProtectedItems,
    pub item_permissions: Vec<ItemPermission>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AciItem {
    pub identification_tag: String,
    pub precedence: u8,
    #[serde(default = "default_auth_level")]
    pub authentication_level: String,
    #[serde(default)]
    pub user_first: Option<UserFirst>,
    #[serde(default)]
    pub item_first: Option<ItemFirst>,
}

fn default_auth_level() -> String {
    "none".to_string()
}

fn invalid(msg: impl Into<String>) -> OperationError {
    let msg = msg.into();
    admin_error!(%msg, "invalid aci item");
    OperationError::InvalidAciItem(msg)
}

fn norm_dn<S: SchemaTransaction + ?Sized>(s: &str, schema: &S) -> Result<String, OperationError> {
    Dn::parse(s)
        .and_then(|dn| dn.normalized(schema))
        .map(|dn| dn.to_norm_string())
        .map_err(|_| invalid(format!("invalid name {}", s)))
}

fn attr_oid<S: SchemaTransaction + ?Sized>(s: &str, schema: &S) -> Result<AttrString, OperationError> {
    schema
        .resolve_attribute(s)
        .map(|sa| sa.oid.clone())
        .ok_or_else(|| invalid(format!("unknown attribute type {}", s)))
}

fn attr_oids<S: SchemaTransaction + ?Sized>(
    names: &[String],
    schema: &S,
) -> Result<BTreeSet<AttrString>, OperationError> {
    names.iter().map(|n| attr_oid(n, schema)).collect()
}

impl UserClasses {
    fn resolve<S: SchemaTransaction + ?Sized>(&self, schema: &S) -> Result<Vec<UserClass>, OperationError> {
        let mut out = Vec::new();
        if self.all_users {
            out.push(UserClass::AllUsers);
        }
        if self.this_entry {
            out.push(UserClass::ThisEntry);
        }
        if self.parent_of_entry {
            out.push(UserClass::ParentOfEntry);
        }
        if !self.name.is_empty() {
            let names = self
                .name
                .iter()
                .map(|n| norm_dn(n, schema))
                .collect::<Result<_, _>>()?;
            out.push(UserClass::Name(names));
        }
        if !self.user_group.is_empty() {
            let groups = self
                .user_group
                .iter()
                .map(|n| norm_dn(n, schema))
                .collect::<Result<_, _>>()?;
            out.push(UserClass::UserGroup(groups));
        }
        if !self.subtree.is_empty() {
            let root = Dn::root();
            let subtrees = self
                .subtree
                .iter()
                .map(|s| s.resolve(&root, schema))
                .collect::<Result<_, _>>()
                .map_err(|e| invalid(e.to_string()))?;
            out.push(UserClass::Subtree(subtrees));
        }
        if out.is_empty() {
            return Err(invalid("no user classes"));
        }
        Ok(out)
    }
}

impl ProtectedItems {
    fn resolve<S: SchemaTransaction + ?Sized>(&self, schema: &S) -> Result<Vec<ProtectedItem>, OperationError> {
        let mut out = Vec::new();
        if self.entry {
            out.push(ProtectedItem::Entry);
        }
        if self.all_user_attribute_types {
            out.push(ProtectedItem::AllUserAttributeTypes);
        }
        if self.all_user_attribute_types_and_values {
            out.push(ProtectedItem::AllUserAttributeTypesAndValues);
        }
        if !self.attribute_type.is_empty() {
            out.push(ProtectedItem::AttributeType(attr_oids(&self.attribute_type, schema)?));
        }
        if !self.all_attribute_values.is_empty() {
            out.push(ProtectedItem::AllAttributeValues(attr_oids(
                &self.all_attribute_values,
                schema,
            )?));
        }
        if !self.self_value.is_empty() {
            out.push(ProtectedItem::SelfValue(attr_oids(&self.self_value, schema)?));
        }
        if !self.attribute_value.is_empty() {
            let avas = self
                .attribute_value
                .iter()
                .map(|ava| {
                    let sa = schema
                        .resolve_attribute(&ava.attr)
                        .ok_or_else(|| invalid(format!("unknown attribute type {}", ava.attr)))?;
                    let v = schema
                        .normalize_value(sa, &RawValue::from(ava.value.as_str()))
                        .map_err(|e| invalid(e.to_string()))?;
                    Ok((sa.oid.clone(), v))
                })
                .collect::<Result<_, OperationError>>()?;
            out.push(ProtectedItem::AttributeValue(avas));
        }
        if !self.max_value_count.is_empty() {
            let elems = self
                .max_value_count
                .iter()
                .map(|e| attr_oid(&e.attr, schema).map(|oid| (oid, e.max_count)))
                .collect::<Result<_, _>>()?;
            out.push(ProtectedItem::MaxValueCount(elems));
        }
        if let Some(max) = self.max_imm_sub {
            out.push(ProtectedItem::MaxImmSub(max));
        }
        if !self.restricted_by.is_empty() {
            let elems = self
                .restricted_by
                .iter()
                .map(|e| Ok((attr_oid(&e.attr, schema)?, attr_oid(&e.values_in, schema)?)))
                .collect::<Result<_, OperationError>>()?;
            out.push(ProtectedItem::RestrictedBy(elems));
        }
        if let Some(refinement) = &self.classes {
            out.push(ProtectedItem::Classes(refinement.clone()));
        }
        if let Some(f) = &self.range_of_values {
            let filter = Filter::parse(f)
                .and_then(|f| f.validate(schema))
                .map_err(|e| invalid(e.to_string()))?;
            out.push(ProtectedItem::RangeOfValues(filter));
        }
        if out.is_empty() {
            return Err(invalid("no protected items"));
        }
        Ok(out)
    }
}

fn permissions(grants_and_denials: &[String]) -> Result<(BTreeSet<MicroOperation>, BTreeSet<MicroOperation>), OperationError> {
    let mut grants = BTreeSet::new();
    let mut denials = BTreeSet::new();
    for s in grants_and_denials.iter() {
        match MicroOperation::parse_permission(s) {
            Some((op, true)) => {
                grants.insert(op);
            }
            Some((op, false)) => {
                denials.insert(op);
            }
            None => return Err(invalid(format!("unknown permission {}", s))),
        }
    }
    Ok((grants, denials))
}

impl AciItem {
    pub fn parse(s: &str) -> Result<Self, OperationError> {
        serde_json::from_str(s).map_err(|e| invalid(e.to_string()))
    }

    /// Resolve names and types against the schema and expand into tuples.
    pub fn to_tuples<S: SchemaTransaction + ?Sized>(&self, schema: &S) -> Result<Vec<AciTuple>, OperationError> {
        let auth_level = AuthenticationLevel::parse(&self.authentication_level)
            .ok_or_else(|| invalid(format!("unknown authentication level {}", self.authentication_level)))?;

        let mut permission_sets = Vec::new();
        match (&self.user_first, &self.item_first) {
            (Some(uf), None) => {
                let user_classes = uf.user_classes.resolve(schema)?;
                for p in uf.user_permissions.iter() {
                    permission_sets.push((
                        user_classes.clone(),
                        p.protected_items.resolve(schema)?,
                        p.precedence,
                        permissions(&p.grants_and_denials)?,
                    ));
                }
            }
            (None, Some(itf)) => {
                let protected_items = itf.protected_items.resolve(schema)?;
                for p in itf.item_permissions.iter() {
                    permission_sets.push((
                        p.user_classes.resolve(schema)?,
                        protected_items.clone(),
                        p.precedence,
                        permissions(&p.grants_and_denials)?,
                    ));
                }
            }
            _ => return Err(invalid("exactly one of userFirst or itemFirst is required")),
        }

        let mut tuples = Vec::new();
        for (user_classes, protected_items, precedence, (grants, denials)) in permission_sets {
            let precedence = precedence.unwrap_or(self.precedence);
            for (grant, ops) in [(true, grants), (false, denials)] {
                if ops.is_empty() {
                    continue;
                }
                tuples.push(AciTuple {
                    user_classes: user_classes.clone(),
                    auth_level,
                    protected_items: protected_items.clone(),
                    micro_operations: ops,
                    grant,
                    precedence,
                });
            }
        }
        Ok(tuples)
    }
}

/// Parse and resolve a stored ACI value, as done when one is added or modified.
pub fn parse_aci<S: SchemaTransaction + ?Sized>(s: &str, schema: &S) -> Result<Vec<AciTuple>, OperationError> {
    AciItem::parse(s)?.to_tuples(schema)
}

#[cfg(test)]
mod tests {
    use super::{parse_aci, AciItem};
    use crate::prelude::*;
    use crate::server::access::tuple::{MicroOperation, ProtectedItem, UserClass};

    #[test]
    fn test_aci_user_first() {
        let schema = Schema::new().unwrap();
        let tuples = parse_aci(
            r#"{
                "identificationTag": "selfAccess",
                "precedence": 10,
                "authenticationLevel": "simple",
                "userFirst": {
                    "userClasses": { "thisEntry": true },
                    "userPermissions": [
                        {
                            "protectedItems": { "entry": true, "allUserAttributeTypesAndValues": true },
                            "grantsAndDenials": ["grantRead", "grantBrowse", "denyRemove"]
                        },
                        {
                            "precedence": 20,
                            "protectedItems": { "attributeType": ["userPassword"] },
                            "grantsAndDenials": ["denyRead"]
                        }
                    ]
                }
            }"#,
            &schema.read(),
        )
        .unwrap();
        assert_eq!(tuples.len(), 3);
        assert!(tuples[0].grant);
        assert_eq!(tuples[0].precedence, 10);
        assert_eq!(tuples[0].auth_level, AuthenticationLevel::Simple);
        assert!(tuples[0].micro_operations.contains(&MicroOperation::Browse));
        assert!(matches!(tuples[0].user_classes[0], UserClass::ThisEntry));
        assert!(!tuples[1].grant);
        assert!(tuples[1].micro_operations.contains(&MicroOperation::Remove));
        assert_eq!(tuples[2].precedence, 20);
        assert!(matches!(tuples[2].protected_items[0], ProtectedItem::AttributeType(_)));
    }

    #[test]
    fn test_aci_item_first() {
        let schema = Schema::new().unwrap();
        let tuples = parse_aci(
            r#"{
                "identificationTag": "adminsManage",
                "precedence": 50,
                "itemFirst": {
                    "protectedItems": { "entry": true, "maxValueCount": [{ "type": "cn", "maxCount": 2 }] },
                    "itemPermissions": [
                        {
                            "userClasses": { "userGroup": ["cn=Administrators,ou=groups,ou=system"] },
                            "grantsAndDenials": ["grantAdd", "grantModify"]
                        }
                    ]
                }
            }"#,
            &schema.read(),
        )
        .unwrap();
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].auth_level, AuthenticationLevel::None);
        let UserClass::UserGroup(groups) = &tuples[0].user_classes[0] else {
            panic!("expected a user group class");
        };
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_aci_invalid() {
        let schema = Schema::new().unwrap();
        let schema = schema.read();
        // Not JSON.
        assert!(matches!(
            parse_aci("{ identificationTag: x", &schema),
            Err(OperationError::InvalidAciItem(_))
        ));
        // Both forms.
        assert!(AciItem::parse(
            r#"{"identificationTag": "x", "precedence": 1,
                "userFirst": {"userClasses": {"allUsers": true}, "userPermissions": []},
                "itemFirst": {"protectedItems": {"entry": true}, "itemPermissions": []}}"#
        )
        .and_then(|a| a.to_tuples(&schema))
        .is_err());
        // Unknown attribute type.
        assert!(parse_aci(
            r#"{"identificationTag": "x", "precedence": 1,
                "userFirst": {"userClasses": {"allUsers": true}, "userPermissions": [
                    {"protectedItems": {"attributeType": ["noSuchType"]}, "grantsAndDenials": ["grantRead"]}]}}"#,
            &schema
        )
        .is_err());
        // Unknown permission.
        assert!(parse_aci(
            r#"{"identificationTag": "x", "precedence": 1,
                "userFirst": {"userClasses": {"allUsers": true}, "userPermissions": [
                    {"protectedItems": {"entry": true}, "grantsAndDenials": ["grantEverything"]}]}}"#,
            &schema
        )
        .is_err());
    }
}
