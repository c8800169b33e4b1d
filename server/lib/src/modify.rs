//! Modification expressions and validation. This is how modify operations store and
//! express the series of changes that should be applied to an entry, in the order
//! they must be applied.

use std::collections::BTreeSet;
use std::slice;

use serde::{Deserialize, Serialize};

use crate::prelude::*;
use crate::schema::{SchemaAttribute, SchemaTransaction};

/// The LDAP modify operation kinds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModifyOp {
    Add,
    Replace,
    Remove,
}

/// Who asked for a modification. System modifications are made by interceptors and
/// may touch attributes that users can not, and are applied leniently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOrigin {
    User,
    System,
}

/// A modification as provided by a client, before schema resolution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RawModify {
    pub op: ModifyOp,
    pub attr: AttrString,
    pub values: Vec<RawValue>,
}

pub fn m_add(attr: &str, values: &[&str]) -> RawModify {
    RawModify {
        op: ModifyOp::Add,
        attr: attr.into(),
        values: values.iter().map(|v| RawValue::from(*v)).collect(),
    }
}

pub fn m_replace(attr: &str, values: &[&str]) -> RawModify {
    RawModify {
        op: ModifyOp::Replace,
        attr: attr.into(),
        values: values.iter().map(|v| RawValue::from(*v)).collect(),
    }
}

pub fn m_remove(attr: &str, values: &[&str]) -> RawModify {
    RawModify {
        op: ModifyOp::Remove,
        attr: attr.into(),
        values: values.iter().map(|v| RawValue::from(*v)).collect(),
    }
}

/// Remove every value of an attribute.
pub fn m_purge(attr: &str) -> RawModify {
    RawModify {
        op: ModifyOp::Remove,
        attr: attr.into(),
        values: Vec::new(),
    }
}

/// A schema resolved modification.
#[derive(Debug, Clone)]
pub struct Modification {
    pub op: ModifyOp,
    pub attr: Arc<SchemaAttribute>,
    pub values: Vec<Value>,
    pub origin: ModOrigin,
}

impl Modification {
    pub fn system(op: ModifyOp, attr: Arc<SchemaAttribute>, values: Vec<Value>) -> Self {
        Modification {
            op,
            attr,
            values,
            origin: ModOrigin::System,
        }
    }

    pub fn to_raw(&self) -> RawModify {
        RawModify {
            op: self.op,
            attr: self.attr.name().into(),
            values: self.values.iter().map(|v| v.to_raw()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModifyInvalid {
    mods: Vec<RawModify>,
}

#[derive(Debug, Clone, Default)]
pub struct ModifyValid {
    mods: Vec<Modification>,
}

#[derive(Clone, Debug, Default)]
pub struct ModifyList<VALID> {
    // The order of this list matters. Each change must be done in order.
    valid: VALID,
}

impl<'a> IntoIterator for &'a ModifyList<ModifyValid> {
    type IntoIter = slice::Iter<'a, Modification>;
    type Item = &'a Modification;

    fn into_iter(self) -> Self::IntoIter {
        self.valid.mods.iter()
    }
}

impl ModifyList<ModifyInvalid> {
    pub fn new() -> Self {
        ModifyList {
            valid: ModifyInvalid {
                mods: Vec::with_capacity(0),
            },
        }
    }

    pub fn new_list(mods: Vec<RawModify>) -> Self {
        ModifyList {
            valid: ModifyInvalid { mods },
        }
    }

    pub fn push_mod(&mut self, modify: RawModify) {
        self.valid.mods.push(modify)
    }

    pub fn len(&self) -> usize {
        self.valid.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid.mods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RawModify> {
        self.valid.mods.iter()
    }

    /// Resolve every attribute type and normalise every value.
    pub fn validate<S: SchemaTransaction + ?Sized>(
        &self,
        schema: &S,
    ) -> Result<ModifyList<ModifyValid>, OperationError> {
        if self.valid.mods.is_empty() {
            return Err(OperationError::UnwillingToPerform(
                "empty modification list".to_string(),
            ));
        }
        let mods = self
            .valid
            .mods
            .iter()
            .map(|rm| -> Result<Modification, OperationError> {
                let attr = schema
                    .resolve_attribute(&rm.attr)
                    .cloned()
                    .ok_or_else(|| SchemaError::InvalidAttribute(rm.attr.to_string()))?;
                let values = rm
                    .values
                    .iter()
                    .map(|rv| schema.normalize_value(&attr, rv))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Modification {
                    op: rm.op,
                    attr,
                    values,
                    origin: ModOrigin::User,
                })
            })
            .collect::<Result<Vec<_>, OperationError>>()?;
        Ok(ModifyList {
            valid: ModifyValid { mods },
        })
    }
}

impl ModifyList<ModifyValid> {
    pub fn new_valid(mods: Vec<Modification>) -> Self {
        ModifyList {
            valid: ModifyValid { mods },
        }
    }

    pub fn iter(&self) -> slice::Iter<'_, Modification> {
        self.valid.mods.iter()
    }

    pub fn len(&self) -> usize {
        self.valid.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid.mods.is_empty()
    }

    pub fn push(&mut self, m: Modification) {
        self.valid.mods.push(m)
    }

    /// Append a modification made by the server itself.
    pub fn push_system(&mut self, op: ModifyOp, attr: Arc<SchemaAttribute>, values: Vec<Value>) {
        self.valid.mods.push(Modification::system(op, attr, values))
    }

    /// Drop every modification of the given type.
    pub fn remove_attr(&mut self, oid: &str) {
        self.valid.mods.retain(|m| m.attr.oid.as_str() != oid)
    }

    pub fn touches(&self, oid: &str) -> bool {
        self.valid.mods.iter().any(|m| m.attr.oid.as_str() == oid)
    }

    /// True when the client supplied modifications touch nothing but `oid`.
    pub fn user_mods_only_touch(&self, oid: &str) -> bool {
        let mut user = self
            .valid
            .mods
            .iter()
            .filter(|m| m.origin == ModOrigin::User)
            .peekable();
        user.peek().is_some() && user.all(|m| m.attr.oid.as_str() == oid)
    }

    pub fn user_mods(&self) -> impl Iterator<Item = &Modification> {
        self.valid
            .mods
            .iter()
            .filter(|m| m.origin == ModOrigin::User)
    }

    /// OIDs of every attribute type the list touches.
    pub fn touched_oids(&self) -> BTreeSet<AttrString> {
        self.valid.mods.iter().map(|m| m.attr.oid.clone()).collect()
    }

    pub fn to_raw(&self) -> Vec<RawModify> {
        self.valid.mods.iter().map(|m| m.to_raw()).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::modify::{m_add, m_purge, m_replace, ModOrigin, ModifyList, ModifyOp};
    use crate::prelude::*;

    #[test]
    fn test_modify_validate() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();

        let ml = ModifyList::new_list(vec![
            m_add("commonName", &["A", "B"]),
            m_purge(ATTR_DESCRIPTION),
        ])
        .validate(&schema_ro)
        .unwrap();
        assert_eq!(ml.len(), 2);
        let first = ml.iter().next().unwrap();
        assert_eq!(first.attr.name(), ATTR_CN);
        assert_eq!(first.op, ModifyOp::Add);
        assert_eq!(first.origin, ModOrigin::User);
        assert_eq!(first.values.len(), 2);

        assert!(ModifyList::new_list(vec![m_replace("nosuchattr", &["x"])])
            .validate(&schema_ro)
            .is_err());
        assert!(ModifyList::new_list(vec![m_replace(ATTR_CREATE_TIMESTAMP, &["notatime"])])
            .validate(&schema_ro)
            .is_err());
        assert!(ModifyList::new().validate(&schema_ro).is_err());
    }

    #[test]
    fn test_modify_user_mods_only_touch() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();
        let deleted = schema_ro.resolve_attribute(ATTR_ENTRY_DELETED).unwrap().clone();

        let mut ml = ModifyList::new_list(vec![m_replace(ATTR_ENTRY_DELETED, &["TRUE"])])
            .validate(&schema_ro)
            .unwrap();
        let (ts, v) = schema_ro
            .value_for(ATTR_MODIFY_TIMESTAMP, "20231019120000Z")
            .unwrap();
        ml.push_system(ModifyOp::Replace, ts, vec![v]);
        assert!(ml.user_mods_only_touch(deleted.oid.as_str()));
        assert!(ml.touches(deleted.oid.as_str()));

        let ml = ModifyList::new_list(vec![
            m_replace(ATTR_ENTRY_DELETED, &["TRUE"]),
            m_replace(ATTR_DESCRIPTION, &["x"]),
        ])
        .validate(&schema_ro)
        .unwrap();
        assert!(!ml.user_mods_only_touch(deleted.oid.as_str()));
    }
}
