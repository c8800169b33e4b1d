//! [`Schema`] holds the attribute types and object classes that every [`Entry`] must
//! conform to. Attribute types decide how values are validated, normalised and
//! compared. Object classes decide which attribute types an entry must and may hold.
//!
//! The schema is bootstrapped in memory and held in copy on write cells, so that a
//! reader always sees a consistent set of definitions while a writer extends them.
//!
//! [`Entry`]: ../entry/struct.Entry.html

use std::collections::BTreeSet;
use std::sync::Arc;

use concread::cowcell::*;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::dn::Dn;
use crate::prelude::*;
use crate::value::{MatchingRule, RawValue, SyntaxType, Value};

/// How an attribute type is used, from RFC 4512 section 4.1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeUsage {
    UserApplications,
    DirectoryOperation,
    DistributedOperation,
    DsaOperation,
}

/// The definition of an attribute type.
#[derive(Debug, Clone)]
pub struct SchemaAttribute {
    pub oid: AttrString,
    pub names: Vec<AttrString>,
    pub description: String,
    pub syntax: SyntaxType,
    pub equality: MatchingRule,
    pub ordering: Option<MatchingRule>,
    pub substring: Option<MatchingRule>,
    pub single_value: bool,
    pub collective: bool,
    pub no_user_modification: bool,
    pub usage: AttributeUsage,
    pub sup: Option<AttrString>,
}

impl SchemaAttribute {
    pub fn new(oid: &str, names: &[&str], syntax: SyntaxType) -> Self {
        SchemaAttribute {
            oid: oid.into(),
            names: names.iter().map(|n| AttrString::from(*n)).collect(),
            description: String::new(),
            syntax,
            equality: syntax.default_equality(),
            ordering: None,
            substring: None,
            single_value: false,
            collective: false,
            no_user_modification: false,
            usage: AttributeUsage::UserApplications,
            sup: None,
        }
    }

    pub fn description(mut self, d: &str) -> Self {
        self.description = d.to_string();
        self
    }

    pub fn single_value(mut self) -> Self {
        self.single_value = true;
        self
    }

    pub fn collective(mut self) -> Self {
        self.collective = true;
        self
    }

    pub fn no_user_modification(mut self) -> Self {
        self.no_user_modification = true;
        self
    }

    pub fn usage(mut self, usage: AttributeUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn equality(mut self, rule: MatchingRule) -> Self {
        self.equality = rule;
        self
    }

    pub fn ordering(mut self, rule: MatchingRule) -> Self {
        self.ordering = Some(rule);
        self
    }

    pub fn substring(mut self, rule: MatchingRule) -> Self {
        self.substring = Some(rule);
        self
    }

    pub fn sup(mut self, sup: &str) -> Self {
        self.sup = Some(sup.into());
        self
    }

    /// The declared primary name, or the OID when the type has no name.
    pub fn name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.as_str())
            .unwrap_or(self.oid.as_str())
    }

    pub fn has_name(&self, n: &str) -> bool {
        self.oid.as_str() == n || self.names.iter().any(|x| x.eq_ignore_ascii_case(n))
    }

    pub fn is_operational(&self) -> bool {
        self.usage != AttributeUsage::UserApplications
    }

    pub fn ordering_rule(&self) -> MatchingRule {
        self.ordering.unwrap_or(self.equality)
    }

    pub fn substring_rule(&self) -> MatchingRule {
        self.substring.unwrap_or(self.equality)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    Abstract,
    Structural,
    Auxiliary,
}

/// The definition of an object class. Superior classes are held by name and must and
/// may lists by attribute type OID once added to the schema.
#[derive(Debug, Clone)]
pub struct SchemaClass {
    pub oid: AttrString,
    pub names: Vec<AttrString>,
    pub description: String,
    pub kind: ClassKind,
    pub sup: Vec<AttrString>,
    pub must: Vec<AttrString>,
    pub may: Vec<AttrString>,
}

impl SchemaClass {
    pub fn new(oid: &str, names: &[&str], kind: ClassKind) -> Self {
        SchemaClass {
            oid: oid.into(),
            names: names.iter().map(|n| AttrString::from(*n)).collect(),
            description: String::new(),
            kind,
            sup: Vec::new(),
            must: Vec::new(),
            may: Vec::new(),
        }
    }

    pub fn sup(mut self, sup: &[&str]) -> Self {
        self.sup = sup.iter().map(|n| AttrString::from(*n)).collect();
        self
    }

    pub fn must(mut self, must: &[&str]) -> Self {
        self.must = must.iter().map(|n| AttrString::from(*n)).collect();
        self
    }

    pub fn may(mut self, may: &[&str]) -> Self {
        self.may = may.iter().map(|n| AttrString::from(*n)).collect();
        self
    }

    pub fn name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.as_str())
            .unwrap_or(self.oid.as_str())
    }
}

/// The attribute types an entry's set of object classes permits.
#[derive(Debug, Default)]
pub struct ClassRules {
    pub must: BTreeSet<AttrString>,
    pub may: BTreeSet<AttrString>,
    pub structural: Vec<Arc<SchemaClass>>,
    pub classes: Vec<Arc<SchemaClass>>,
    pub extensible: bool,
    pub collective_subentry: bool,
}

#[derive(Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

struct SchemaInner {
    attributes: CowCell<HashMap<AttrString, Arc<SchemaAttribute>>>,
    classes: CowCell<HashMap<AttrString, Arc<SchemaClass>>>,
    attr_aliases: CowCell<HashMap<AttrString, AttrString>>,
    class_aliases: CowCell<HashMap<AttrString, AttrString>>,
}

pub struct SchemaWriteTransaction<'a> {
    attributes: CowCellWriteTxn<'a, HashMap<AttrString, Arc<SchemaAttribute>>>,
    classes: CowCellWriteTxn<'a, HashMap<AttrString, Arc<SchemaClass>>>,
    attr_aliases: CowCellWriteTxn<'a, HashMap<AttrString, AttrString>>,
    class_aliases: CowCellWriteTxn<'a, HashMap<AttrString, AttrString>>,
}

pub struct SchemaReadTransaction {
    attributes: CowCellReadTxn<HashMap<AttrString, Arc<SchemaAttribute>>>,
    classes: CowCellReadTxn<HashMap<AttrString, Arc<SchemaClass>>>,
    attr_aliases: CowCellReadTxn<HashMap<AttrString, AttrString>>,
    class_aliases: CowCellReadTxn<HashMap<AttrString, AttrString>>,
}

fn alias_key(name: &str) -> AttrString {
    // Attribute options such as ;binary are not part of the type.
    let name = name.split(';').next().unwrap_or(name);
    name.trim().to_lowercase().into()
}

pub trait SchemaTransaction {
    fn get_attributes(&self) -> &HashMap<AttrString, Arc<SchemaAttribute>>;

    fn get_classes(&self) -> &HashMap<AttrString, Arc<SchemaClass>>;

    fn get_attr_aliases(&self) -> &HashMap<AttrString, AttrString>;

    fn get_class_aliases(&self) -> &HashMap<AttrString, AttrString>;

    /// Find an attribute type by any of its names or its OID.
    fn resolve_attribute(&self, name: &str) -> Option<&Arc<SchemaAttribute>> {
        self.get_attr_aliases()
            .get(&alias_key(name))
            .and_then(|oid| self.get_attributes().get(oid))
    }

    /// Find an object class by any of its names or its OID.
    fn resolve_class(&self, name: &str) -> Option<&Arc<SchemaClass>> {
        self.get_class_aliases()
            .get(&alias_key(name))
            .and_then(|oid| self.get_classes().get(oid))
    }

    /// Validate and normalise a raw value for the given attribute type. This is the one
    /// place values are resolved, everything downstream compares the normalised form.
    fn normalize_value(
        &self,
        sa: &SchemaAttribute,
        raw: &RawValue,
    ) -> Result<Value, OperationError> {
        if sa.syntax.is_binary() {
            return Ok(Value::new_binary(raw.as_bytes().to_vec()));
        }
        let s = raw
            .as_text()
            .ok_or_else(|| OperationError::InvalidAttributeSyntax(sa.name().to_string()))?;
        if !sa.syntax.validate_text(s) {
            return Err(OperationError::InvalidAttributeSyntax(format!(
                "{}: {}",
                sa.name(),
                s
            )));
        }
        let norm = match sa.equality {
            MatchingRule::ObjectIdentifierMatch => {
                if let Some(sc) = self.resolve_class(s) {
                    sc.name().to_lowercase()
                } else if let Some(at) = self.resolve_attribute(s) {
                    at.name().to_lowercase()
                } else {
                    s.trim().to_lowercase()
                }
            }
            MatchingRule::DistinguishedNameMatch => Dn::parse(s)
                .and_then(|dn| dn.normalized(self))
                .map(|dn| dn.to_norm_string())
                .map_err(|_| {
                    OperationError::InvalidAttributeSyntax(format!("{}: {}", sa.name(), s))
                })?,
            rule => rule.normalize_text(s)?,
        };
        Ok(Value::new_text(s, norm))
    }

    /// Build a value from a string for an attribute named by the caller.
    fn value_for(&self, attr: &str, s: &str) -> Result<(Arc<SchemaAttribute>, Value), OperationError> {
        let sa = self
            .resolve_attribute(attr)
            .cloned()
            .ok_or_else(|| SchemaError::InvalidAttribute(attr.to_string()))?;
        let v = self.normalize_value(&sa, &RawValue::Text(s.to_string()))?;
        Ok((sa, v))
    }

    /// Expand the named classes with all of their superiors and collect the attribute
    /// types they require and permit.
    fn class_rules<'a, I>(&self, names: I) -> Result<ClassRules, SchemaError>
    where
        I: Iterator<Item = &'a str>,
    {
        let mut rules = ClassRules::default();
        let mut seen: BTreeSet<AttrString> = BTreeSet::new();
        let mut invalid = Vec::new();
        let mut work: Vec<String> = names.map(|s| s.to_string()).collect();
        if work.is_empty() {
            return Err(SchemaError::NoClassFound);
        }

        while let Some(name) = work.pop() {
            let Some(sc) = self.resolve_class(&name) else {
                invalid.push(name);
                continue;
            };
            if !seen.insert(sc.oid.clone()) {
                continue;
            }
            rules.must.extend(sc.must.iter().cloned());
            rules.may.extend(sc.may.iter().cloned());
            match sc.kind {
                ClassKind::Structural => rules.structural.push(sc.clone()),
                ClassKind::Auxiliary | ClassKind::Abstract => {}
            }
            if sc.name().eq_ignore_ascii_case(CLASS_EXTENSIBLE_OBJECT) {
                rules.extensible = true;
            }
            if sc
                .name()
                .eq_ignore_ascii_case(CLASS_COLLECTIVE_ATTRIBUTE_SUBENTRY)
            {
                rules.collective_subentry = true;
            }
            work.extend(sc.sup.iter().map(|s| s.to_string()));
            rules.classes.push(sc.clone());
        }

        if invalid.is_empty() {
            Ok(rules)
        } else {
            Err(SchemaError::InvalidClass(invalid))
        }
    }

    /// True when `sub` is `sup` or inherits from it.
    fn is_subclass_of(&self, sub: &SchemaClass, sup: &SchemaClass) -> bool {
        let mut work: Vec<&str> = vec![sub.name()];
        let mut seen = BTreeSet::new();
        while let Some(n) = work.pop() {
            let Some(sc) = self.resolve_class(n) else {
                continue;
            };
            if sc.oid == sup.oid {
                return true;
            }
            if seen.insert(sc.oid.clone()) {
                work.extend(sc.sup.iter().map(|s| s.as_str()));
            }
        }
        false
    }

    fn validate(&self) -> Vec<Result<(), ConsistencyError>> {
        let mut res = Vec::new();
        let attributes = self.get_attributes();
        for sc in self.get_classes().values() {
            for a in sc.must.iter().chain(sc.may.iter()) {
                if !attributes.contains_key(a) {
                    res.push(Err(ConsistencyError::SchemaClassPhantomAttribute(
                        sc.name().to_string(),
                        a.to_string(),
                    )));
                }
            }
            for s in sc.sup.iter() {
                if self.resolve_class(s).is_none() {
                    res.push(Err(ConsistencyError::SchemaClassMissingSuperior(
                        sc.name().to_string(),
                        s.to_string(),
                    )));
                }
            }
        }
        for sa in attributes.values() {
            if let Some(sup) = &sa.sup {
                if self.resolve_attribute(sup).is_none() {
                    res.push(Err(ConsistencyError::SchemaClassMissingAttribute(
                        sa.name().to_string(),
                        sup.to_string(),
                    )));
                }
            }
        }
        res
    }
}

impl<'a> SchemaWriteTransaction<'a> {
    pub fn commit(self) -> Result<(), OperationError> {
        let errs: Vec<ConsistencyError> = self
            .validate()
            .into_iter()
            .filter_map(|r| r.err())
            .collect();
        if !errs.is_empty() {
            admin_error!(?errs, "Schema validation failed, refusing to commit");
            return Err(OperationError::ConsistencyError(errs));
        }

        let SchemaWriteTransaction {
            attributes,
            classes,
            attr_aliases,
            class_aliases,
        } = self;

        attr_aliases.commit();
        class_aliases.commit();
        classes.commit();
        attributes.commit();
        Ok(())
    }

    pub fn add_attribute(&mut self, sa: SchemaAttribute) -> Result<(), OperationError> {
        let mut keys = vec![alias_key(&sa.oid)];
        keys.extend(sa.names.iter().map(|n| alias_key(n)));
        if let Some(k) = keys.iter().find(|k| self.attr_aliases.contains_key(*k)) {
            return Err(OperationError::ConsistencyError(vec![
                ConsistencyError::SchemaNameNotUnique(k.to_string()),
            ]));
        }
        let aliases = self.attr_aliases.get_mut();
        for k in keys {
            aliases.insert(k, sa.oid.clone());
        }
        self.attributes.get_mut().insert(sa.oid.clone(), Arc::new(sa));
        Ok(())
    }

    /// Add a class. The must and may lists are resolved to attribute type OIDs, unknown
    /// names are kept as given and reported by `validate`.
    pub fn add_class(&mut self, mut sc: SchemaClass) -> Result<(), OperationError> {
        let mut keys = vec![alias_key(&sc.oid)];
        keys.extend(sc.names.iter().map(|n| alias_key(n)));
        if let Some(k) = keys.iter().find(|k| self.class_aliases.contains_key(*k)) {
            return Err(OperationError::ConsistencyError(vec![
                ConsistencyError::SchemaNameNotUnique(k.to_string()),
            ]));
        }
        let resolve = |names: &[AttrString]| -> Vec<AttrString> {
            names
                .iter()
                .map(|n| {
                    self.resolve_attribute(n)
                        .map(|sa| sa.oid.clone())
                        .unwrap_or_else(|| n.clone())
                })
                .collect()
        };
        sc.must = resolve(&sc.must);
        sc.may = resolve(&sc.may);

        let aliases = self.class_aliases.get_mut();
        for k in keys {
            aliases.insert(k, sc.oid.clone());
        }
        self.classes.get_mut().insert(sc.oid.clone(), Arc::new(sc));
        Ok(())
    }

    /// Load the bootstrap attribute types and classes.
    pub fn generate_in_memory(&mut self) -> Result<(), OperationError> {
        admin_debug!("generating in memory schema");
        for sa in crate::constants::schema::system_attributes() {
            self.add_attribute(sa)?;
        }
        for sc in crate::constants::schema::system_classes() {
            self.add_class(sc)?;
        }
        Ok(())
    }
}

impl<'a> SchemaTransaction for SchemaWriteTransaction<'a> {
    fn get_attributes(&self) -> &HashMap<AttrString, Arc<SchemaAttribute>> {
        &self.attributes
    }

    fn get_classes(&self) -> &HashMap<AttrString, Arc<SchemaClass>> {
        &self.classes
    }

    fn get_attr_aliases(&self) -> &HashMap<AttrString, AttrString> {
        &self.attr_aliases
    }

    fn get_class_aliases(&self) -> &HashMap<AttrString, AttrString> {
        &self.class_aliases
    }
}

impl SchemaTransaction for SchemaReadTransaction {
    fn get_attributes(&self) -> &HashMap<AttrString, Arc<SchemaAttribute>> {
        &self.attributes
    }

    fn get_classes(&self) -> &HashMap<AttrString, Arc<SchemaClass>> {
        &self.classes
    }

    fn get_attr_aliases(&self) -> &HashMap<AttrString, AttrString> {
        &self.attr_aliases
    }

    fn get_class_aliases(&self) -> &HashMap<AttrString, AttrString> {
        &self.class_aliases
    }
}

impl Schema {
    pub fn new() -> Result<Self, OperationError> {
        let s = Schema {
            inner: Arc::new(SchemaInner {
                attributes: CowCell::new(HashMap::with_capacity(128)),
                classes: CowCell::new(HashMap::with_capacity(64)),
                attr_aliases: CowCell::new(HashMap::with_capacity(256)),
                class_aliases: CowCell::new(HashMap::with_capacity(128)),
            }),
        };
        let mut sw = s.write();
        sw.generate_in_memory()?;
        sw.commit()?;
        Ok(s)
    }

    pub fn read(&self) -> SchemaReadTransaction {
        SchemaReadTransaction {
            attributes: self.inner.attributes.read(),
            classes: self.inner.classes.read(),
            attr_aliases: self.inner.attr_aliases.read(),
            class_aliases: self.inner.class_aliases.read(),
        }
    }

    pub fn write(&self) -> SchemaWriteTransaction<'_> {
        SchemaWriteTransaction {
            attributes: self.inner.attributes.write(),
            classes: self.inner.classes.write(),
            attr_aliases: self.inner.attr_aliases.write(),
            class_aliases: self.inner.class_aliases.write(),
        }
    }
}
