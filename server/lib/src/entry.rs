//! Entries are the base unit of object storage in the server. This is one of the three
//! foundational concepts along with [`filter`]s and [`schema`] that everything else
//! builds upon.
//!
//! An [`Entry`] is a distinguished name and a collection of attribute value sets. Each
//! attribute is held by the OID of its type, carrying the resolved schema definition
//! alongside its values, so that matching never has to consult the schema again.
//!
//! There are three rules for entries:
//! * The DN is normalised against the schema before the entry exists.
//! * Any attribute with zero values is removed (except in types-only search results).
//! * Values of one attribute are unique under its equality matching rule.
//!
//! [`filter`]: ../filter/index.html
//! [`schema`]: ../schema/index.html

use std::collections::{BTreeMap, BTreeSet};

use crate::filter::{FilterResolved, FilterValid, SubstringAssertion};
use crate::modify::{ModOrigin, Modification, ModifyList, ModifyOp, ModifyValid};
use crate::prelude::*;
use crate::schema::{SchemaAttribute, SchemaTransaction};

// Entry should have a lifecycle of types. A new entry has never been in a partition
// so it has no id. Once stored it becomes committed and carries the id the partition
// assigned. Only committed entries are ever handed back to callers.

// Has never been in a partition, so doesn't have an ID.
#[derive(Clone, Debug)]
pub struct EntryNew;

// It's been in a partition, so it has an id
#[derive(Clone, Debug)]
pub struct EntryCommitted {
    id: u64,
}

pub type EntrySealedCommitted = Entry<EntryCommitted>;

/// One attribute of an entry: the resolved type and its values.
#[derive(Clone, Debug)]
pub struct Attribute {
    schema: Arc<SchemaAttribute>,
    values: ValueSet,
}

impl Attribute {
    pub fn new(schema: Arc<SchemaAttribute>) -> Self {
        Attribute {
            schema,
            values: ValueSet::new(),
        }
    }

    pub fn schema(&self) -> &Arc<SchemaAttribute> {
        &self.schema
    }

    pub fn oid(&self) -> &str {
        self.schema.oid.as_str()
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn values(&self) -> &ValueSet {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, v: &Value) -> bool {
        self.values.contains(v)
    }

    /// The user provided forms of all text values.
    pub fn iter_str(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(|v| v.as_str())
    }

    pub fn first_str(&self) -> Option<&str> {
        self.values.first().and_then(|v| v.as_str())
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.schema.oid == other.schema.oid && self.values == other.values
    }
}

/// A raw entry, as it arrives from a client, LDIF or a test, before the schema has
/// resolved its attribute types and normalised its values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryInit {
    dn: String,
    attrs: Vec<(AttrString, RawValue)>,
}

impl EntryInit {
    pub fn new(dn: &str) -> Self {
        EntryInit {
            dn: dn.to_string(),
            attrs: Vec::new(),
        }
    }

    pub fn add_ava<V: Into<RawValue>>(&mut self, attr: &str, v: V) {
        self.attrs.push((attr.into(), v.into()));
    }

    pub fn with<V: Into<RawValue>>(mut self, attr: &str, v: V) -> Self {
        self.add_ava(attr, v);
        self
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: &str) {
        self.dn = dn.to_string();
    }

    pub fn attrs(&self) -> &[(AttrString, RawValue)] {
        &self.attrs
    }

    pub fn remove_attr(&mut self, attr: &str) {
        self.attrs.retain(|(a, _)| !a.eq_ignore_ascii_case(attr));
    }

    /// Resolve every attribute against the schema, normalising the DN and the values.
    pub fn into_entry<S: SchemaTransaction + ?Sized>(
        self,
        schema: &S,
    ) -> Result<Entry<EntryNew>, OperationError> {
        let dn = Dn::parse(&self.dn)?.normalized(schema)?;
        let mut e = Entry::new(dn);
        for (attr, raw) in self.attrs {
            let sa = schema
                .resolve_attribute(&attr)
                .cloned()
                .ok_or_else(|| SchemaError::InvalidAttribute(attr.to_string()))?;
            let v = schema.normalize_value(&sa, &raw)?;
            e.add_ava(sa, v);
        }
        Ok(e)
    }
}

/// The attributes a search asked to have returned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeSelection {
    all_user: bool,
    all_operational: bool,
    explicit: BTreeSet<AttrString>,
}

impl AttributeSelection {
    /// The selection used when a request names no attributes.
    pub fn all_user() -> Self {
        AttributeSelection {
            all_user: true,
            ..Default::default()
        }
    }

    pub fn everything() -> Self {
        AttributeSelection {
            all_user: true,
            all_operational: true,
            explicit: BTreeSet::new(),
        }
    }

    pub fn from_requested<S: AsRef<str>>(requested: &[S]) -> Self {
        if requested.is_empty() {
            return AttributeSelection::all_user();
        }
        let mut sel = AttributeSelection::default();
        for r in requested.iter().map(|r| r.as_ref().trim()) {
            match r {
                SELECT_ALL_USER => sel.all_user = true,
                SELECT_ALL_OPERATIONAL => sel.all_operational = true,
                // 1.1 alone selects nothing, alongside others it is ignored.
                SELECT_NO_ATTRIBUTES => {}
                name => {
                    sel.explicit.insert(name.to_lowercase().into());
                }
            }
        }
        sel
    }

    pub fn includes(&self, sa: &SchemaAttribute) -> bool {
        if self
            .explicit
            .iter()
            .any(|n| n.as_str() == sa.oid.as_str() || sa.has_name(n))
        {
            return true;
        }
        if sa.is_operational() {
            self.all_operational
        } else {
            self.all_user
        }
    }

    pub fn requests(&self, name: &str) -> bool {
        self.explicit.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn is_all_operational(&self) -> bool {
        self.all_operational
    }
}

/// A directory entry.
#[derive(Clone, Debug)]
pub struct Entry<STATE> {
    state: STATE,
    dn: Dn,
    // Keyed by the OID of the attribute type.
    attrs: BTreeMap<AttrString, Attribute>,
}

impl Entry<EntryNew> {
    pub fn new(dn: Dn) -> Self {
        Entry {
            state: EntryNew,
            dn,
            attrs: BTreeMap::new(),
        }
    }

    pub fn into_committed(self, id: u64) -> Entry<EntryCommitted> {
        Entry {
            state: EntryCommitted { id },
            dn: self.dn,
            attrs: self.attrs,
        }
    }
}

impl Entry<EntryCommitted> {
    pub fn get_id(&self) -> u64 {
        self.state.id
    }

    /// A copy without the id, used as the working copy of a mutation.
    pub fn clone_new(&self) -> Entry<EntryNew> {
        Entry {
            state: EntryNew,
            dn: self.dn.clone(),
            attrs: self.attrs.clone(),
        }
    }

    /// Restrict the attributes to a search selection.
    pub fn reduce_attributes(&mut self, sel: &AttributeSelection, types_only: bool) {
        self.attrs.retain(|_, a| sel.includes(&a.schema));
        if types_only {
            for a in self.attrs.values_mut() {
                a.values.clear();
            }
        }
    }
}

impl<STATE> Entry<STATE> {
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    /// Find an attribute by OID or any of its names.
    pub fn get_ava(&self, attr: &str) -> Option<&Attribute> {
        if let Some(a) = self.attrs.get(attr) {
            return Some(a);
        }
        let attr = attr.split(';').next().unwrap_or(attr);
        self.attrs
            .values()
            .find(|a| a.schema.has_name(attr) || a.oid().eq_ignore_ascii_case(attr))
    }

    fn get_ava_mut(&mut self, oid: &str) -> Option<&mut Attribute> {
        self.attrs.get_mut(oid)
    }

    pub fn get_ava_set(&self, attr: &str) -> Option<&ValueSet> {
        self.get_ava(attr).map(|a| &a.values)
    }

    pub fn get_ava_single_str(&self, attr: &str) -> Option<&str> {
        self.get_ava(attr).and_then(|a| a.first_str())
    }

    pub fn get_ava_iter_str(&self, attr: &str) -> impl Iterator<Item = &str> {
        self.get_ava(attr).into_iter().flat_map(|a| a.iter_str())
    }

    pub fn get_ava_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.values().map(|a| a.name())
    }

    pub fn attrs(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.values()
    }

    pub fn attribute_pres(&self, attr: &str) -> bool {
        self.get_ava(attr).is_some()
    }

    /// Equality against an already normalised value.
    pub fn attribute_equality(&self, attr: &str, v: &Value) -> bool {
        self.get_ava(attr).map(|a| a.contains(v)).unwrap_or(false)
    }

    /// Equality against a string, normalised with the attribute's own equality rule.
    /// Object classes use their lower case canonical name.
    pub fn attribute_equality_str(&self, attr: &str, s: &str) -> bool {
        let Some(a) = self.get_ava(attr) else {
            return false;
        };
        match a.schema.equality.normalize_text(s) {
            Ok(norm) => a.values.iter().any(|v| v.norm_str() == Some(norm.as_str())),
            Err(_) => false,
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attribute_equality_str(ATTR_OBJECTCLASS, class)
    }

    pub fn is_subentry(&self) -> bool {
        self.has_class(CLASS_SUBENTRY)
    }

    pub fn is_alias(&self) -> bool {
        self.has_class(CLASS_ALIAS)
    }

    pub fn is_referral(&self) -> bool {
        self.has_class(CLASS_REFERRAL)
    }

    /// Returns true if the value was not already present.
    pub fn add_ava(&mut self, sa: Arc<SchemaAttribute>, v: Value) -> bool {
        self.attrs
            .entry(sa.oid.clone())
            .or_insert_with(|| Attribute::new(sa))
            .values
            .insert(v)
    }

    /// Replace all values of an attribute. An empty set removes it.
    pub fn set_ava(&mut self, sa: Arc<SchemaAttribute>, vs: ValueSet) {
        if vs.is_empty() {
            self.attrs.remove(&sa.oid);
        } else {
            self.attrs
                .insert(sa.oid.clone(), Attribute { schema: sa, values: vs });
        }
    }

    /// Insert an attribute with no values, only valid in types-only results.
    pub(crate) fn set_ava_empty(&mut self, sa: Arc<SchemaAttribute>) {
        self.attrs.insert(sa.oid.clone(), Attribute::new(sa));
    }

    /// Returns true if the value was present.
    pub fn remove_ava(&mut self, oid: &str, v: &Value) -> bool {
        let Some(a) = self.attrs.get_mut(oid) else {
            return false;
        };
        let r = a.values.remove(v);
        if a.values.is_empty() {
            self.attrs.remove(oid);
        }
        r
    }

    pub fn purge_ava(&mut self, attr: &str) -> Option<Attribute> {
        let oid = self.get_ava(attr).map(|a| a.schema.oid.clone())?;
        self.attrs.remove(&oid)
    }

    /// Apply a validated modification list in order. Failure leaves the entry in an
    /// unspecified state, so callers apply it to a working copy.
    pub fn apply_modlist(&mut self, modlist: &ModifyList<ModifyValid>) -> Result<(), OperationError> {
        for m in modlist.iter() {
            self.apply_modification(m)?;
        }
        Ok(())
    }

    pub fn apply_modification(&mut self, m: &Modification) -> Result<(), OperationError> {
        let oid = m.attr.oid.clone();
        let lenient = m.origin == ModOrigin::System;
        match m.op {
            ModifyOp::Add => {
                for v in m.values.iter() {
                    if !self.add_ava(m.attr.clone(), v.clone()) && !lenient {
                        return Err(OperationError::AttributeOrValueExists(format!(
                            "{}: {}",
                            m.attr.name(),
                            v
                        )));
                    }
                }
            }
            ModifyOp::Remove => {
                if self.get_ava_mut(&oid).is_none() {
                    if lenient {
                        return Ok(());
                    }
                    return Err(OperationError::NoSuchAttribute(m.attr.name().to_string()));
                }
                if m.values.is_empty() {
                    self.attrs.remove(&oid);
                } else {
                    for v in m.values.iter() {
                        if !self.remove_ava(&oid, v) && !lenient {
                            return Err(OperationError::NoSuchAttribute(format!(
                                "{}: {}",
                                m.attr.name(),
                                v
                            )));
                        }
                    }
                }
            }
            ModifyOp::Replace => {
                let vs: ValueSet = m.values.iter().cloned().collect();
                self.set_ava(m.attr.clone(), vs);
            }
        }
        Ok(())
    }

    /// True when every assertion of the leaf RDN is held as a value of the entry.
    pub fn rdn_values_present(&self) -> bool {
        let Some(rdn) = self.dn.rdn() else {
            return true;
        };
        rdn.avas().iter().all(|ava| {
            self.attrs
                .get(ava.oid())
                .map(|a| a.values.iter().any(|v| v.norm_str() == Some(ava.norm())))
                .unwrap_or(false)
        })
    }

    /// Add the values named by the leaf RDN if they are missing.
    pub fn ensure_rdn_values<S: SchemaTransaction + ?Sized>(
        &mut self,
        schema: &S,
    ) -> Result<(), OperationError> {
        let Some(rdn) = self.dn.rdn().cloned() else {
            return Ok(());
        };
        for ava in rdn.avas() {
            let (sa, v) = schema.value_for(ava.oid(), ava.value())?;
            self.add_ava(sa, v);
        }
        Ok(())
    }

    /// Check the entry against the object class rules of the schema.
    pub fn schema_check<S: SchemaTransaction + ?Sized>(&self, schema: &S) -> Result<(), SchemaError> {
        let oc = self
            .get_ava(ATTR_OBJECTCLASS)
            .ok_or(SchemaError::NoClassFound)?;
        let rules = schema.class_rules(oc.iter_str())?;

        if rules.structural.is_empty() {
            return Err(SchemaError::NoStructuralClass);
        }
        // The structural classes must form one superclass chain.
        let chained = rules.structural.iter().any(|s| {
            rules
                .structural
                .iter()
                .all(|o| schema.is_subclass_of(s, o))
        });
        if !chained {
            return Err(SchemaError::MultipleStructuralClasses(
                rules
                    .structural
                    .iter()
                    .map(|s| s.name().to_string())
                    .collect(),
            ));
        }

        let missing: Vec<String> = rules
            .must
            .iter()
            .filter(|oid| !self.attrs.contains_key(*oid))
            .map(|oid| {
                schema
                    .get_attributes()
                    .get(oid)
                    .map(|sa| sa.name().to_string())
                    .unwrap_or_else(|| oid.to_string())
            })
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingMustAttribute(missing));
        }

        for (oid, a) in self.attrs.iter() {
            if a.schema.single_value && a.values.len() > 1 {
                return Err(SchemaError::SingleValueViolation(a.name().to_string()));
            }
            if a.schema.collective {
                if rules.collective_subentry {
                    continue;
                }
                return Err(SchemaError::CollectiveOnRegularEntry(a.name().to_string()));
            }
            if a.schema.is_operational() || rules.extensible {
                continue;
            }
            if !rules.must.contains(oid) && !rules.may.contains(oid) {
                return Err(SchemaError::AttributeNotValidForClass(a.name().to_string()));
            }
        }
        Ok(())
    }

    /// True when both entries hold the same name and attributes.
    pub fn same_content<S2>(&self, other: &Entry<S2>) -> bool {
        self.dn == other.dn && self.attrs == other.attrs
    }

    /// Back to the raw form, object classes first.
    pub fn to_entry_init(&self) -> EntryInit {
        let mut ei = EntryInit::new(&self.dn.to_string());
        let (oc, rest): (Vec<&Attribute>, Vec<&Attribute>) = self
            .attrs
            .values()
            .partition(|a| a.schema.has_name(ATTR_OBJECTCLASS));
        for a in oc.into_iter().chain(rest) {
            for v in a.values.iter() {
                ei.add_ava(a.name(), v.to_raw());
            }
        }
        ei
    }

    pub fn entry_match_no_index(&self, filter: &Filter<FilterValid>) -> bool {
        self.entry_match_resolved(filter.to_inner())
    }

    /// Match one component of a resolved filter. Undefined is not a match.
    pub fn entry_match_resolved(&self, filter: &FilterResolved) -> bool {
        match_values(filter, &|sa| self.attrs.get(&sa.oid).map(|a| &a.values)) == Some(true)
    }
}

/// Match a filter as though `v` were the only value of an entry holding only `sa`.
pub(crate) fn value_match_resolved(filter: &FilterResolved, sa: &SchemaAttribute, v: &Value) -> bool {
    let mut single = ValueSet::new();
    single.insert(v.clone());
    match_values(filter, &|other| (other.oid == sa.oid).then_some(&single)) == Some(true)
}

// Three valued, None is Undefined.
fn match_values<'a>(
    filter: &FilterResolved,
    values_of: &dyn Fn(&SchemaAttribute) -> Option<&'a ValueSet>,
) -> Option<bool> {
    match filter {
        FilterResolved::Eq(sa, v) | FilterResolved::Approx(sa, v) => {
            Some(values_of(sa).map(|vs| vs.contains(v)).unwrap_or(false))
        }
        FilterResolved::Sub(sa, sub) => Some(
            values_of(sa)
                .map(|vs| {
                    vs.iter().any(|v| {
                        v.norm_str()
                            .map(|s| substring_match(&sa.substring_rule().normalize_substring(s), sub))
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false),
        ),
        FilterResolved::Pres(sa) => Some(values_of(sa).is_some()),
        FilterResolved::Ge(sa, v) => Some(
            values_of(sa)
                .map(|vs| {
                    let rule = sa.ordering_rule();
                    vs.iter().any(|x| rule.compare(x, v).is_ge())
                })
                .unwrap_or(false),
        ),
        FilterResolved::Le(sa, v) => Some(
            values_of(sa)
                .map(|vs| {
                    let rule = sa.ordering_rule();
                    vs.iter().any(|x| rule.compare(x, v).is_le())
                })
                .unwrap_or(false),
        ),
        FilterResolved::And(l) => {
            let mut undefined = false;
            for f in l.iter() {
                match match_values(f, values_of) {
                    Some(false) => return Some(false),
                    None => undefined = true,
                    Some(true) => {}
                }
            }
            if undefined {
                None
            } else {
                Some(true)
            }
        }
        FilterResolved::Or(l) => {
            let mut undefined = false;
            for f in l.iter() {
                match match_values(f, values_of) {
                    Some(true) => return Some(true),
                    None => undefined = true,
                    Some(false) => {}
                }
            }
            if undefined {
                None
            } else {
                Some(false)
            }
        }
        FilterResolved::Not(f) => match_values(f, values_of).map(|b| !b),
        FilterResolved::Undefined(_) => None,
    }
}

fn substring_match(value: &str, sub: &SubstringAssertion) -> bool {
    let mut rest = value;
    if let Some(initial) = &sub.initial {
        match rest.strip_prefix(initial.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for any in sub.any.iter() {
        match rest.find(any.as_str()) {
            Some(idx) => rest = &rest[idx + any.len()..],
            None => return false,
        }
    }
    match &sub.end {
        Some(end) => rest.ends_with(end.as_str()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use crate::entry::{AttributeSelection, EntryInit};
    use crate::modify::{m_add, m_remove, m_replace, ModifyList};
    use crate::prelude::*;

    fn person(schema: &Schema) -> Entry<EntryNew> {
        entry_init!(
            "cn=William,ou=people,dc=example,dc=com",
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_OBJECTCLASS, CLASS_TOP),
            (ATTR_CN, "William"),
            (ATTR_SN, "Brown"),
            (ATTR_DESCRIPTION, "a test person")
        )
        .into_entry(&schema.read())
        .expect("invalid entry")
    }

    #[test]
    fn test_entry_resolution_and_names() {
        let schema = Schema::new().unwrap();
        let e = person(&schema);
        assert!(e.attribute_pres("commonName"));
        assert!(e.attribute_pres("2.5.4.3"));
        assert!(e.attribute_pres("CN"));
        assert!(e.attribute_equality_str(ATTR_CN, "  WILLIAM "));
        assert!(e.has_class("Person"));
        assert!(e.rdn_values_present());
        assert!(e.schema_check(&schema.read()).is_ok());

        let bad = EntryInit::new("cn=x").with("nosuchattr", "x");
        assert!(matches!(
            bad.into_entry(&schema.read()),
            Err(OperationError::SchemaViolation(SchemaError::InvalidAttribute(_)))
        ));
    }

    #[test]
    fn test_entry_schema_check() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();

        let missing_sn = entry_init!(
            "cn=a",
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_CN, "a")
        )
        .into_entry(&schema_ro)
        .unwrap();
        assert_eq!(
            missing_sn.schema_check(&schema_ro),
            Err(SchemaError::MissingMustAttribute(vec![ATTR_SN.to_string()]))
        );

        let not_allowed = entry_init!(
            "ou=a",
            (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
            (ATTR_OU, "a"),
            (ATTR_MAIL, "a@example.com")
        )
        .into_entry(&schema_ro)
        .unwrap();
        assert!(matches!(
            not_allowed.schema_check(&schema_ro),
            Err(SchemaError::AttributeNotValidForClass(_))
        ));

        let two_structural = entry_init!(
            "ou=a",
            (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_OU, "a"),
            (ATTR_CN, "a"),
            (ATTR_SN, "a")
        )
        .into_entry(&schema_ro)
        .unwrap();
        assert!(matches!(
            two_structural.schema_check(&schema_ro),
            Err(SchemaError::MultipleStructuralClasses(_))
        ));

        let collective = entry_init!(
            "ou=a",
            (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
            (ATTR_OU, "a"),
            (ATTR_C_OU, "b")
        )
        .into_entry(&schema_ro)
        .unwrap();
        assert!(matches!(
            collective.schema_check(&schema_ro),
            Err(SchemaError::CollectiveOnRegularEntry(_))
        ));

        let extensible = entry_init!(
            "ou=a",
            (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
            (ATTR_OBJECTCLASS, CLASS_EXTENSIBLE_OBJECT),
            (ATTR_OU, "a"),
            (ATTR_MAIL, "a@example.com")
        )
        .into_entry(&schema_ro)
        .unwrap();
        assert!(extensible.schema_check(&schema_ro).is_ok());
    }

    #[test]
    fn test_entry_apply_modlist() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();
        let mut e = person(&schema);

        let ml = ModifyList::new_list(vec![
            m_add(ATTR_TELEPHONE_NUMBER, &["+1 555 0100"]),
            m_replace(ATTR_DESCRIPTION, &["updated"]),
        ])
        .validate(&schema_ro)
        .unwrap();
        e.apply_modlist(&ml).unwrap();
        assert!(e.attribute_equality_str(ATTR_DESCRIPTION, "Updated"));
        assert!(e.attribute_pres(ATTR_TELEPHONE_NUMBER));

        // Adding an existing value is an error.
        let ml = ModifyList::new_list(vec![m_add(ATTR_SN, &["BROWN"])])
            .validate(&schema_ro)
            .unwrap();
        assert_eq!(
            e.apply_modlist(&ml),
            Err(OperationError::AttributeOrValueExists(String::new()))
        );

        // So is removing a value that is not held.
        let ml = ModifyList::new_list(vec![m_remove(ATTR_SN, &["Smith"])])
            .validate(&schema_ro)
            .unwrap();
        assert_eq!(
            e.apply_modlist(&ml),
            Err(OperationError::NoSuchAttribute(String::new()))
        );

        // Replace with nothing removes the attribute.
        let ml = ModifyList::new_list(vec![m_replace(ATTR_DESCRIPTION, &[])])
            .validate(&schema_ro)
            .unwrap();
        e.apply_modlist(&ml).unwrap();
        assert!(!e.attribute_pres(ATTR_DESCRIPTION));
    }

    #[test]
    fn test_entry_filter_match() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();
        let e = person(&schema);

        let check = |s: &str| -> bool {
            let f = Filter::parse(s).unwrap().validate(&schema_ro).unwrap();
            e.entry_match_no_index(&f)
        };

        assert!(check("(cn=william)"));
        assert!(check("(cn=wil*)"));
        assert!(check("(cn=*LLI*)"));
        assert!(check("(&(objectClass=person)(sn=brown))"));
        assert!(check("(|(sn=smith)(sn=brown))"));
        assert!(check("(!(sn=smith))"));
        assert!(!check("(mail=*)"));
        assert!(check("(sn>=a)"));
        assert!(!check("(sn<=a)"));
        // An undefined type matches nothing, and its negation matches nothing either.
        assert!(!check("(nosuchattr=x)"));
        assert!(!check("(!(nosuchattr=x))"));
        assert!(check("(|(nosuchattr=x)(cn=william))"));
    }

    #[test]
    fn test_entry_reduce_attributes() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();
        let mut e = person(&schema);
        let (sa, v) = schema_ro
            .value_for(ATTR_ENTRY_UUID, "00000000-0000-0000-0000-000000000001")
            .unwrap();
        e.add_ava(sa, v);
        let e = e.into_committed(1);

        let mut all = e.clone();
        all.reduce_attributes(&AttributeSelection::from_requested::<&str>(&[]), false);
        assert!(all.attribute_pres(ATTR_CN));
        assert!(!all.attribute_pres(ATTR_ENTRY_UUID));

        let mut op = e.clone();
        op.reduce_attributes(&AttributeSelection::from_requested(&["+"]), false);
        assert!(!op.attribute_pres(ATTR_CN));
        assert!(op.attribute_pres(ATTR_ENTRY_UUID));

        let mut named = e.clone();
        named.reduce_attributes(&AttributeSelection::from_requested(&["commonName", "entryuuid"]), true);
        assert!(named.attribute_pres(ATTR_CN));
        assert!(named.attribute_pres(ATTR_ENTRY_UUID));
        assert!(!named.attribute_pres(ATTR_SN));
        assert!(named.get_ava(ATTR_CN).map(|a| a.is_empty()).unwrap_or(false));

        let mut none = e;
        none.reduce_attributes(&AttributeSelection::from_requested(&["1.1"]), false);
        assert_eq!(none.attrs().count(), 0);
    }
}
