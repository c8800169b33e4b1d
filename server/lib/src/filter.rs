//! [`Filter`]s are one of the three foundational concepts of the design in dirsrvd.
//! They are used in nearly every aspect of the server to provide searching of
//! datasets and assertion of entry properties.
//!
//! A filter is a logical statement of properties that an [`Entry`] and its
//! attribute-value sets must possess for it to be considered included in the result
//! set. Filters arrive either as RFC 4515 strings or built with the short form
//! constructors of [`FC`], and must be validated against the schema before use.
//! Validation resolves every attribute type and normalises every assertion value, and
//! turns assertions about unknown types into `Undefined`, which matches nothing.
//!
//! [`Filter`]: struct.Filter.html
//! [`Entry`]: ../entry/struct.Entry.html

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::prelude::*;
use crate::schema::{SchemaAttribute, SchemaTransaction};

/// The components of a substring assertion, `initial*any*...*final`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SubstringAssertion {
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub end: Option<String>,
}

impl SubstringAssertion {
    /// Split a pattern on `*`. There must be at least one `*`.
    pub fn from_pattern(pattern: &str) -> Option<Self> {
        if !pattern.contains('*') {
            return None;
        }
        let parts: Vec<&str> = pattern.split('*').collect();
        let last = parts.len() - 1;
        let mut sa = SubstringAssertion::default();
        for (i, p) in parts.into_iter().enumerate() {
            if p.is_empty() {
                continue;
            }
            if i == 0 {
                sa.initial = Some(p.to_string());
            } else if i == last {
                sa.end = Some(p.to_string());
            } else {
                sa.any.push(p.to_string());
            }
        }
        Some(sa)
    }

    fn map<F: Fn(&str) -> String>(&self, f: F) -> Self {
        SubstringAssertion {
            initial: self.initial.as_deref().map(&f),
            any: self.any.iter().map(|s| f(s)).collect(),
            end: self.end.as_deref().map(&f),
        }
    }
}

impl fmt::Display for SubstringAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(i) = &self.initial {
            f.write_str(&escape_assertion(i))?;
        }
        f.write_str("*")?;
        for a in self.any.iter() {
            write!(f, "{}*", escape_assertion(a))?;
        }
        if let Some(e) = &self.end {
            f.write_str(&escape_assertion(e))?;
        }
        Ok(())
    }
}

/// A short form filter component, as written by callers and tests.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum FC {
    Eq(AttrString, String),
    Sub(AttrString, SubstringAssertion),
    Pres(AttrString),
    Ge(AttrString, String),
    Le(AttrString, String),
    Approx(AttrString, String),
    And(Vec<FC>),
    Or(Vec<FC>),
    Not(Box<FC>),
}

pub fn f_eq(a: &str, v: &str) -> FC {
    FC::Eq(a.into(), v.to_string())
}

/// A substring assertion from a pattern such as `wil*am`. A pattern with no `*` is
/// treated as an equality assertion.
pub fn f_sub(a: &str, pattern: &str) -> FC {
    match SubstringAssertion::from_pattern(pattern) {
        Some(sa) => FC::Sub(a.into(), sa),
        None => f_eq(a, pattern),
    }
}

pub fn f_pres(a: &str) -> FC {
    FC::Pres(a.into())
}

pub fn f_ge(a: &str, v: &str) -> FC {
    FC::Ge(a.into(), v.to_string())
}

pub fn f_le(a: &str, v: &str) -> FC {
    FC::Le(a.into(), v.to_string())
}

pub fn f_approx(a: &str, v: &str) -> FC {
    FC::Approx(a.into(), v.to_string())
}

pub fn f_and(vs: Vec<FC>) -> FC {
    FC::And(vs)
}

pub fn f_or(vs: Vec<FC>) -> FC {
    FC::Or(vs)
}

pub fn f_not(fc: FC) -> FC {
    FC::Not(Box::new(fc))
}

/// A filter component with every type resolved and every value normalised.
#[derive(Debug, Clone)]
pub enum FilterResolved {
    Eq(Arc<SchemaAttribute>, Value),
    Sub(Arc<SchemaAttribute>, SubstringAssertion),
    Pres(Arc<SchemaAttribute>),
    Ge(Arc<SchemaAttribute>, Value),
    Le(Arc<SchemaAttribute>, Value),
    Approx(Arc<SchemaAttribute>, Value),
    And(Vec<FilterResolved>),
    Or(Vec<FilterResolved>),
    Not(Box<FilterResolved>),
    // An assertion that can never be evaluated, such as one on an unknown type.
    Undefined(AttrString),
}

impl FilterResolved {
    fn resolve<S: SchemaTransaction + ?Sized>(fc: &FC, schema: &S) -> Result<Self, OperationError> {
        // Resolve an ava, an unknown type or an invalid value is Undefined.
        let ava = |a: &AttrString, v: &str| -> Option<(Arc<SchemaAttribute>, Value)> {
            let sa = schema.resolve_attribute(a)?.clone();
            let v = schema
                .normalize_value(&sa, &RawValue::Text(v.to_string()))
                .ok()?;
            Some((sa, v))
        };
        let undefined = |a: &AttrString| {
            filter_trace!(attr = %a, "undefined filter assertion");
            FilterResolved::Undefined(a.clone())
        };

        Ok(match fc {
            FC::Eq(a, v) => match ava(a, v.as_str()) {
                Some((sa, v)) => FilterResolved::Eq(sa, v),
                None => undefined(a),
            },
            FC::Approx(a, v) => match ava(a, v.as_str()) {
                Some((sa, v)) => FilterResolved::Approx(sa, v),
                None => undefined(a),
            },
            FC::Ge(a, v) => match ava(a, v.as_str()) {
                Some((sa, v)) => FilterResolved::Ge(sa, v),
                None => undefined(a),
            },
            FC::Le(a, v) => match ava(a, v.as_str()) {
                Some((sa, v)) => FilterResolved::Le(sa, v),
                None => undefined(a),
            },
            FC::Sub(a, sub) => match schema.resolve_attribute(a) {
                Some(sa) if !sa.syntax.is_binary() => {
                    let rule = sa.substring_rule();
                    FilterResolved::Sub(sa.clone(), sub.map(|s| rule.normalize_substring(s)))
                }
                _ => undefined(a),
            },
            FC::Pres(a) => match schema.resolve_attribute(a) {
                Some(sa) => FilterResolved::Pres(sa.clone()),
                None => undefined(a),
            },
            FC::And(l) => {
                if l.is_empty() {
                    return Err(SchemaError::EmptyFilter.into());
                }
                FilterResolved::And(
                    l.iter()
                        .map(|f| FilterResolved::resolve(f, schema))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            FC::Or(l) => {
                if l.is_empty() {
                    return Err(SchemaError::EmptyFilter.into());
                }
                FilterResolved::Or(
                    l.iter()
                        .map(|f| FilterResolved::resolve(f, schema))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            FC::Not(f) => FilterResolved::Not(Box::new(FilterResolved::resolve(f, schema)?)),
        })
    }

    /// The attribute type an assertion is about, if this is a leaf.
    pub fn attribute(&self) -> Option<&Arc<SchemaAttribute>> {
        match self {
            FilterResolved::Eq(sa, _)
            | FilterResolved::Sub(sa, _)
            | FilterResolved::Pres(sa)
            | FilterResolved::Ge(sa, _)
            | FilterResolved::Le(sa, _)
            | FilterResolved::Approx(sa, _) => Some(sa),
            _ => None,
        }
    }

    fn references_subentry_class(&self) -> bool {
        match self {
            FilterResolved::Eq(sa, v) => {
                sa.has_name(ATTR_OBJECTCLASS)
                    && v.norm_str() == Some(CLASS_SUBENTRY.to_lowercase().as_str())
            }
            FilterResolved::And(l) | FilterResolved::Or(l) => {
                l.iter().any(|f| f.references_subentry_class())
            }
            _ => false,
        }
    }
}

impl fmt::Display for FilterResolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterResolved::Eq(sa, v) => write!(f, "({}={})", sa.name(), escape_assertion(&v.to_string())),
            FilterResolved::Sub(sa, s) => write!(f, "({}={})", sa.name(), s),
            FilterResolved::Pres(sa) => write!(f, "({}=*)", sa.name()),
            FilterResolved::Ge(sa, v) => write!(f, "({}>={})", sa.name(), escape_assertion(&v.to_string())),
            FilterResolved::Le(sa, v) => write!(f, "({}<={})", sa.name(), escape_assertion(&v.to_string())),
            FilterResolved::Approx(sa, v) => write!(f, "({}~={})", sa.name(), escape_assertion(&v.to_string())),
            FilterResolved::And(l) => {
                f.write_str("(&")?;
                for i in l.iter() {
                    write!(f, "{}", i)?;
                }
                f.write_str(")")
            }
            FilterResolved::Or(l) => {
                f.write_str("(|")?;
                for i in l.iter() {
                    write!(f, "{}", i)?;
                }
                f.write_str(")")
            }
            FilterResolved::Not(i) => write!(f, "(!{})", i),
            FilterResolved::Undefined(a) => write!(f, "(?{}?)", a),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterInvalid {
    inner: FC,
}

#[derive(Debug, Clone)]
pub struct FilterValid {
    inner: FilterResolved,
}

/// A filter. Only a `Filter<FilterValid>` may be evaluated.
#[derive(Debug, Clone)]
pub struct Filter<STATE> {
    state: STATE,
}

impl Filter<FilterInvalid> {
    pub fn new(inner: FC) -> Self {
        Filter {
            state: FilterInvalid { inner },
        }
    }

    /// Parse an RFC 4515 string. A bare `attr=value` item is accepted too.
    pub fn parse(s: &str) -> Result<Self, OperationError> {
        let s = s.trim();
        let mut p = Parser {
            input: s,
            chars: s.char_indices().collect(),
            pos: 0,
        };
        let fc = if s.starts_with('(') {
            p.filter()?
        } else {
            p.item(s.len())?
        };
        if p.pos != p.chars.len() {
            return Err(p.err());
        }
        Ok(Filter::new(fc))
    }

    pub fn as_fc(&self) -> &FC {
        &self.state.inner
    }

    #[instrument(level = "trace", skip_all)]
    pub fn validate<S: SchemaTransaction + ?Sized>(
        &self,
        schema: &S,
    ) -> Result<Filter<FilterValid>, OperationError> {
        FilterResolved::resolve(&self.state.inner, schema).map(|inner| Filter {
            state: FilterValid { inner },
        })
    }
}

impl Filter<FilterValid> {
    pub fn new_valid(inner: FilterResolved) -> Self {
        Filter {
            state: FilterValid { inner },
        }
    }

    /// `(objectClass=*)`, matching every entry.
    pub fn all<S: SchemaTransaction + ?Sized>(schema: &S) -> Result<Self, OperationError> {
        Filter::new(f_pres(ATTR_OBJECTCLASS)).validate(schema)
    }

    pub fn to_inner(&self) -> &FilterResolved {
        &self.state.inner
    }

    pub fn into_inner(self) -> FilterResolved {
        self.state.inner
    }

    /// A filter that explicitly asks for subentries, so they should not be hidden.
    pub fn is_subentry_filter(&self) -> bool {
        self.state.inner.references_subentry_class()
    }

    pub fn matches<STATE>(&self, e: &Entry<STATE>) -> bool {
        e.entry_match_no_index(self)
    }

    /// Match against a single attribute value, as `rangeOfValues` requires.
    pub fn matches_value(&self, sa: &SchemaAttribute, v: &Value) -> bool {
        crate::entry::value_match_resolved(&self.state.inner, sa, v)
    }
}

impl fmt::Display for Filter<FilterValid> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state.inner.fmt(f)
    }
}

impl fmt::Display for FC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FC::Eq(a, v) => write!(f, "({}={})", a, escape_assertion(v)),
            FC::Sub(a, s) => write!(f, "({}={})", a, s),
            FC::Pres(a) => write!(f, "({}=*)", a),
            FC::Ge(a, v) => write!(f, "({}>={})", a, escape_assertion(v)),
            FC::Le(a, v) => write!(f, "({}<={})", a, escape_assertion(v)),
            FC::Approx(a, v) => write!(f, "({}~={})", a, escape_assertion(v)),
            FC::And(l) => {
                f.write_str("(&")?;
                for i in l.iter() {
                    write!(f, "{}", i)?;
                }
                f.write_str(")")
            }
            FC::Or(l) => {
                f.write_str("(|")?;
                for i in l.iter() {
                    write!(f, "{}", i)?;
                }
                f.write_str(")")
            }
            FC::Not(i) => write!(f, "(!{})", i),
        }
    }
}

fn escape_assertion(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn err(&self) -> OperationError {
        OperationError::UnwillingToPerform(format!("invalid filter: {}", self.input))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn expect(&mut self, c: char) -> Result<(), OperationError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err())
        }
    }

    fn byte_offset(&self, pos: usize) -> usize {
        self.chars
            .get(pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
    }

    fn filter(&mut self) -> Result<FC, OperationError> {
        self.expect('(')?;
        let fc = match self.peek() {
            Some('&') => {
                self.pos += 1;
                FC::And(self.filter_list()?)
            }
            Some('|') => {
                self.pos += 1;
                FC::Or(self.filter_list()?)
            }
            Some('!') => {
                self.pos += 1;
                FC::Not(Box::new(self.filter()?))
            }
            Some(_) => {
                // Find the closing paren of this item, values escape parens as \28 \29.
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == ')' {
                        break;
                    }
                    self.pos += 1;
                }
                let end = self.pos;
                let item = &self.input[self.byte_offset(start)..self.byte_offset(end)];
                let mut sub = Parser {
                    input: item,
                    chars: item.char_indices().collect(),
                    pos: 0,
                };
                sub.item(item.len())?
            }
            None => return Err(self.err()),
        };
        self.expect(')')?;
        Ok(fc)
    }

    fn filter_list(&mut self) -> Result<Vec<FC>, OperationError> {
        let mut l = Vec::new();
        while self.peek() == Some('(') {
            l.push(self.filter()?);
        }
        if l.is_empty() {
            return Err(self.err());
        }
        Ok(l)
    }

    // attr (= | ~= | >= | <=) value
    fn item(&mut self, len: usize) -> Result<FC, OperationError> {
        let s = &self.input[..len];
        let eq = s.find('=').ok_or_else(|| self.err())?;
        let (attr, op) = match s[..eq].chars().last() {
            Some('~') => (&s[..eq - 1], "~="),
            Some('>') => (&s[..eq - 1], ">="),
            Some('<') => (&s[..eq - 1], "<="),
            _ => (&s[..eq], "="),
        };
        let attr = attr.trim();
        if attr.is_empty()
            || !attr
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ';')
        {
            return Err(self.err());
        }
        let raw = &s[eq + 1..];
        self.pos = self.chars.len();

        match op {
            "~=" => Ok(f_approx(attr, &unescape(raw).ok_or_else(|| self.err())?)),
            ">=" => Ok(f_ge(attr, &unescape(raw).ok_or_else(|| self.err())?)),
            "<=" => Ok(f_le(attr, &unescape(raw).ok_or_else(|| self.err())?)),
            _ if raw == "*" => Ok(f_pres(attr)),
            _ if raw.contains('*') => {
                // Split before unescaping so escaped stars stay literal.
                let parts = raw
                    .split('*')
                    .map(unescape)
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| self.err())?;
                let last = parts.len() - 1;
                let mut sa = SubstringAssertion::default();
                for (i, p) in parts.into_iter().enumerate() {
                    if p.is_empty() {
                        continue;
                    }
                    if i == 0 {
                        sa.initial = Some(p);
                    } else if i == last {
                        sa.end = Some(p);
                    } else {
                        sa.any.push(p);
                    }
                }
                Ok(FC::Sub(attr.into(), sa))
            }
            _ => Ok(f_eq(attr, &unescape(raw).ok_or_else(|| self.err())?)),
        }
    }
}

fn unescape(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = s.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// How the store answered a filter, recorded for tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterPlan {
    Invalid(AttrString),
    EqIndexed(AttrString, String),
    EqUnindexed(AttrString),
    PresIndexed(AttrString),
    PresUnindexed(AttrString),
    RangeIndexed(AttrString),
    RangeUnindexed(AttrString),
    SubUnindexed(AttrString),
    AndIndexed(Vec<FilterPlan>),
    AndPartial(Vec<FilterPlan>),
    AndUnindexed(Vec<FilterPlan>),
    OrIndexed(Vec<FilterPlan>),
    OrUnindexed(Vec<FilterPlan>),
    NotUniverse(Box<FilterPlan>),
    Scope(String),
}

impl FilterPlan {
    pub fn is_indexed(&self) -> bool {
        matches!(
            self,
            FilterPlan::EqIndexed(..)
                | FilterPlan::PresIndexed(_)
                | FilterPlan::RangeIndexed(_)
                | FilterPlan::AndIndexed(_)
                | FilterPlan::AndPartial(_)
                | FilterPlan::OrIndexed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::filter::{FilterResolved, SubstringAssertion, FC};
    use crate::prelude::*;

    #[test]
    fn test_filter_parse() {
        let f = Filter::parse("(&(objectClass=person)(|(cn=a*b*c)(sn~=x))(!(mail=*)))").unwrap();
        assert_eq!(
            f.as_fc(),
            &f_and(vec![
                f_eq("objectClass", "person"),
                f_or(vec![
                    FC::Sub(
                        "cn".into(),
                        SubstringAssertion {
                            initial: Some("a".to_string()),
                            any: vec!["b".to_string()],
                            end: Some("c".to_string()),
                        }
                    ),
                    f_approx("sn", "x"),
                ]),
                f_not(f_pres("mail")),
            ])
        );

        assert_eq!(
            Filter::parse("(cn=\\2a\\28x\\29)").unwrap().as_fc(),
            &f_eq("cn", "*(x)")
        );
        assert_eq!(Filter::parse("uid>=5").unwrap().as_fc(), &f_ge("uid", "5"));
        assert!(Filter::parse("(cn=a").is_err());
        assert!(Filter::parse("(&)").is_err());
        assert!(Filter::parse("(=x)").is_err());
        assert!(Filter::parse("(cn=a))").is_err());
    }

    #[test]
    fn test_filter_display_round_trips() {
        let s = "(&(cn=a\\2ab)(!(sn=*))(uid=x*y))";
        let f = Filter::parse(s).unwrap();
        assert_eq!(f.as_fc().to_string(), s);
    }

    #[test]
    fn test_filter_validate() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();
        let f = Filter::new(f_and(vec![
            f_eq("CommonName", "  William "),
            f_eq("nosuchattr", "x"),
            f_eq(ATTR_CREATE_TIMESTAMP, "not a time"),
        ]))
        .validate(&schema_ro)
        .unwrap();
        match f.to_inner() {
            FilterResolved::And(l) => {
                assert!(matches!(&l[0], FilterResolved::Eq(sa, v) if sa.name() == "cn" && v.norm_str() == Some("william")));
                assert!(matches!(&l[1], FilterResolved::Undefined(_)));
                assert!(matches!(&l[2], FilterResolved::Undefined(_)));
            }
            _ => panic!("unexpected filter shape"),
        }
        assert!(Filter::new(f_or(vec![])).validate(&schema_ro).is_err());
    }

    #[test]
    fn test_filter_is_subentry_filter() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();
        let f = Filter::parse("(objectClass=Subentry)")
            .unwrap()
            .validate(&schema_ro)
            .unwrap();
        assert!(f.is_subentry_filter());
        let f = Filter::parse("(&(cn=x)(objectclass=2.5.17.0))")
            .unwrap()
            .validate(&schema_ro)
            .unwrap();
        assert!(f.is_subentry_filter());
        let f = Filter::parse("(!(objectClass=subentry))")
            .unwrap()
            .validate(&schema_ro)
            .unwrap();
        assert!(!f.is_subentry_filter());
    }
}
