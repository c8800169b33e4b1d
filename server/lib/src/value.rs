//! Attribute values. A `Value` carries both the user provided form and the normalised
//! form produced by the equality matching rule of its attribute type, so that matching
//! and indexing never need to re-normalise.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prelude::*;

lazy_static! {
    static ref GENERALIZED_TIME_RE: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new(r"^(\d{4})(\d{2})(\d{2})(\d{2})(\d{2})?(\d{2})?([.,]\d+)?(Z|[+-]\d{4})$")
            .expect("Invalid generalized time regex")
    };
    static ref OID_RE: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new(r"^([0-2])(\.(0|[1-9][0-9]*))+$").expect("Invalid oid regex")
    };
    static ref DESCR_RE: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9-]*$").expect("Invalid descr regex")
    };
}

/// The syntax of an attribute type, which decides what input is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyntaxType {
    DirectoryString,
    Ia5String,
    OctetString,
    Integer,
    Dn,
    GeneralizedTime,
    Oid,
    Boolean,
    Uuid,
    Csn,
    TelephoneNumber,
    NumericString,
    Json,
}

impl SyntaxType {
    /// The equality matching rule an attribute of this syntax uses when the
    /// definition does not name one.
    pub fn default_equality(self) -> MatchingRule {
        match self {
            SyntaxType::DirectoryString => MatchingRule::CaseIgnoreMatch,
            SyntaxType::Ia5String => MatchingRule::CaseIgnoreIa5Match,
            SyntaxType::OctetString => MatchingRule::OctetStringMatch,
            SyntaxType::Integer => MatchingRule::IntegerMatch,
            SyntaxType::Dn => MatchingRule::DistinguishedNameMatch,
            SyntaxType::GeneralizedTime => MatchingRule::GeneralizedTimeMatch,
            SyntaxType::Oid => MatchingRule::ObjectIdentifierMatch,
            SyntaxType::Boolean => MatchingRule::BooleanMatch,
            SyntaxType::Uuid => MatchingRule::UuidMatch,
            SyntaxType::Csn => MatchingRule::CsnMatch,
            SyntaxType::TelephoneNumber => MatchingRule::TelephoneNumberMatch,
            SyntaxType::NumericString => MatchingRule::NumericStringMatch,
            SyntaxType::Json => MatchingRule::CaseExactMatch,
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, SyntaxType::OctetString)
    }

    /// Check that a raw text value is acceptable for this syntax.
    pub fn validate_text(self, s: &str) -> bool {
        match self {
            SyntaxType::DirectoryString | SyntaxType::TelephoneNumber => !s.is_empty(),
            SyntaxType::Ia5String => s.is_ascii(),
            SyntaxType::OctetString | SyntaxType::Csn | SyntaxType::Dn => true,
            SyntaxType::Integer => s.trim().parse::<i64>().is_ok(),
            SyntaxType::GeneralizedTime => GENERALIZED_TIME_RE.is_match(s.trim()),
            SyntaxType::Oid => {
                let s = s.trim();
                OID_RE.is_match(s) || DESCR_RE.is_match(s)
            }
            SyntaxType::Boolean => {
                let s = s.trim();
                s.eq_ignore_ascii_case("TRUE") || s.eq_ignore_ascii_case("FALSE")
            }
            SyntaxType::Uuid => Uuid::parse_str(s.trim()).is_ok(),
            SyntaxType::NumericString => s.chars().all(|c| c.is_ascii_digit() || c == ' '),
            SyntaxType::Json => serde_json::from_str::<serde_json::Value>(s).is_ok(),
        }
    }
}

/// Matching rules decide how values of an attribute are normalised and compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchingRule {
    CaseIgnoreMatch,
    CaseIgnoreIa5Match,
    CaseExactMatch,
    OctetStringMatch,
    IntegerMatch,
    DistinguishedNameMatch,
    GeneralizedTimeMatch,
    ObjectIdentifierMatch,
    NumericStringMatch,
    TelephoneNumberMatch,
    BooleanMatch,
    UuidMatch,
    CsnMatch,
}

/// Collapse runs of whitespace into a single space.
fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out
}

impl MatchingRule {
    /// Normalise a text value with this rule. Distinguished names are normalised
    /// without schema knowledge here, the schema layer refines them.
    pub fn normalize_text(self, s: &str) -> Result<String, OperationError> {
        match self {
            MatchingRule::CaseIgnoreMatch | MatchingRule::CaseIgnoreIa5Match => {
                Ok(collapse_whitespace(s.trim()).to_lowercase())
            }
            MatchingRule::CaseExactMatch => Ok(collapse_whitespace(s.trim())),
            MatchingRule::OctetStringMatch | MatchingRule::CsnMatch => Ok(s.to_string()),
            MatchingRule::IntegerMatch => s
                .trim()
                .parse::<i64>()
                .map(|i| i.to_string())
                .map_err(|_| OperationError::InvalidAttributeSyntax(s.to_string())),
            MatchingRule::DistinguishedNameMatch => {
                crate::dn::Dn::parse(s).map(|dn| dn.to_norm_string())
            }
            MatchingRule::GeneralizedTimeMatch => {
                let s = s.trim();
                let caps = GENERALIZED_TIME_RE
                    .captures(s)
                    .ok_or_else(|| OperationError::InvalidAttributeSyntax(s.to_string()))?;
                let mut out = String::with_capacity(15);
                for i in 1..=6 {
                    out.push_str(caps.get(i).map(|m| m.as_str()).unwrap_or("00"));
                }
                out.push_str(caps.get(8).map(|m| m.as_str()).unwrap_or("Z"));
                Ok(out)
            }
            MatchingRule::ObjectIdentifierMatch => Ok(s.trim().to_lowercase()),
            MatchingRule::NumericStringMatch => Ok(s.chars().filter(|c| *c != ' ').collect()),
            MatchingRule::TelephoneNumberMatch => Ok(s
                .chars()
                .filter(|c| *c != ' ' && *c != '-')
                .collect::<String>()
                .to_lowercase()),
            MatchingRule::BooleanMatch => {
                let s = s.trim();
                if s.eq_ignore_ascii_case("TRUE") {
                    Ok("TRUE".to_string())
                } else if s.eq_ignore_ascii_case("FALSE") {
                    Ok("FALSE".to_string())
                } else {
                    Err(OperationError::InvalidAttributeSyntax(s.to_string()))
                }
            }
            MatchingRule::UuidMatch => Uuid::parse_str(s.trim())
                .map(|u| u.as_hyphenated().to_string())
                .map_err(|_| OperationError::InvalidAttributeSyntax(s.to_string())),
        }
    }

    /// Normalise one component of a substring assertion. Unlike equality the edges are
    /// not trimmed since they abut other components.
    pub fn normalize_substring(self, s: &str) -> String {
        match self {
            MatchingRule::CaseIgnoreMatch | MatchingRule::CaseIgnoreIa5Match => {
                collapse_whitespace(s).to_lowercase()
            }
            MatchingRule::TelephoneNumberMatch => s
                .chars()
                .filter(|c| *c != ' ' && *c != '-')
                .collect::<String>()
                .to_lowercase(),
            MatchingRule::NumericStringMatch => s.chars().filter(|c| *c != ' ').collect(),
            _ => s.to_string(),
        }
    }

    /// Order two normalised values under this rule.
    pub fn compare(self, a: &Value, b: &Value) -> Ordering {
        match self {
            MatchingRule::IntegerMatch => {
                match (
                    a.norm_str().and_then(|s| s.parse::<i64>().ok()),
                    b.norm_str().and_then(|s| s.parse::<i64>().ok()),
                ) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    _ => a.norm_bytes().cmp(b.norm_bytes()),
                }
            }
            _ => a.norm_bytes().cmp(b.norm_bytes()),
        }
    }

    /// True when byte order of the normalised form agrees with `compare`, which lets
    /// range lookups be answered from an equality index.
    pub fn is_lexically_ordered(self) -> bool {
        !matches!(self, MatchingRule::IntegerMatch)
    }
}

/// An unresolved value as provided by a client, LDIF, or a test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawValue {
    Text(String),
    Binary(Vec<u8>),
}

impl RawValue {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RawValue::Text(s) => s.as_bytes(),
            RawValue::Binary(b) => b.as_slice(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(s) => Some(s.as_str()),
            RawValue::Binary(b) => std::str::from_utf8(b).ok(),
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

impl From<&String> for RawValue {
    fn from(s: &String) -> Self {
        RawValue::Text(s.clone())
    }
}

impl From<Vec<u8>> for RawValue {
    fn from(b: Vec<u8>) -> Self {
        RawValue::Binary(b)
    }
}

impl From<&[u8]> for RawValue {
    fn from(b: &[u8]) -> Self {
        RawValue::Binary(b.to_vec())
    }
}

/// A schema resolved value.
#[derive(Debug, Clone)]
pub enum Value {
    Text { up: String, norm: String },
    Binary { up: Vec<u8>, norm: Vec<u8> },
}

impl Value {
    pub fn new_text(up: &str, norm: String) -> Self {
        Value::Text {
            up: up.to_string(),
            norm,
        }
    }

    pub fn new_binary(up: Vec<u8>) -> Self {
        Value::Binary {
            norm: up.clone(),
            up,
        }
    }

    /// Build a value with the given rule. Used for internally generated values where
    /// the attribute type is already known.
    pub fn from_rule(rule: MatchingRule, up: &str) -> Result<Self, OperationError> {
        rule.normalize_text(up).map(|norm| Value::new_text(up, norm))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Value::Binary { .. })
    }

    /// The user provided form.
    pub fn up_bytes(&self) -> &[u8] {
        match self {
            Value::Text { up, .. } => up.as_bytes(),
            Value::Binary { up, .. } => up.as_slice(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text { up, .. } => Some(up.as_str()),
            Value::Binary { .. } => None,
        }
    }

    pub fn norm_str(&self) -> Option<&str> {
        match self {
            Value::Text { norm, .. } => Some(norm.as_str()),
            Value::Binary { .. } => None,
        }
    }

    pub fn norm_bytes(&self) -> &[u8] {
        match self {
            Value::Text { norm, .. } => norm.as_bytes(),
            Value::Binary { norm, .. } => norm.as_slice(),
        }
    }

    /// The key under which this value is held in an equality index.
    pub fn index_key(&self) -> Vec<u8> {
        self.norm_bytes().to_vec()
    }

    pub fn to_raw(&self) -> RawValue {
        match self {
            Value::Text { up, .. } => RawValue::Text(up.clone()),
            Value::Binary { up, .. } => RawValue::Binary(up.clone()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.is_binary() == other.is_binary() && self.norm_bytes() == other.norm_bytes()
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.norm_bytes()
            .cmp(other.norm_bytes())
            .then_with(|| self.is_binary().cmp(&other.is_binary()))
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm_bytes().hash(state);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text { up, .. } => f.write_str(up),
            Value::Binary { up, .. } => write!(f, "<{} bytes>", up.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_case_ignore() {
        let a = Value::from_rule(MatchingRule::CaseIgnoreMatch, "  William   Brown ").unwrap();
        let b = Value::from_rule(MatchingRule::CaseIgnoreMatch, "william brown").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), Some("  William   Brown "));
        assert_eq!(a.norm_str(), Some("william brown"));
    }

    #[test]
    fn test_value_integer() {
        assert!(Value::from_rule(MatchingRule::IntegerMatch, "12a").is_err());
        let a = Value::from_rule(MatchingRule::IntegerMatch, "10").unwrap();
        let b = Value::from_rule(MatchingRule::IntegerMatch, "9").unwrap();
        assert_eq!(MatchingRule::IntegerMatch.compare(&a, &b), Ordering::Greater);
        // Byte order disagrees, so these can't be answered from an index range.
        assert_eq!(a.norm_bytes().cmp(b.norm_bytes()), Ordering::Less);
        assert!(!MatchingRule::IntegerMatch.is_lexically_ordered());
    }

    #[test]
    fn test_value_generalized_time() {
        let t = MatchingRule::GeneralizedTimeMatch
            .normalize_text("202310191200Z")
            .unwrap();
        assert_eq!(t, "20231019120000Z");
        assert!(MatchingRule::GeneralizedTimeMatch
            .normalize_text("yesterday")
            .is_err());
    }

    #[test]
    fn test_value_boolean_and_uuid() {
        assert_eq!(
            MatchingRule::BooleanMatch.normalize_text("true").unwrap(),
            "TRUE"
        );
        assert!(MatchingRule::BooleanMatch.normalize_text("yes").is_err());
        let u = MatchingRule::UuidMatch
            .normalize_text("00000000-0000-0000-0000-FFFFFFFFFFFF")
            .unwrap();
        assert_eq!(u, "00000000-0000-0000-0000-ffffffffffff");
    }

    #[test]
    fn test_syntax_validation() {
        assert!(SyntaxType::Oid.validate_text("2.5.4.3"));
        assert!(SyntaxType::Oid.validate_text("person"));
        assert!(!SyntaxType::Oid.validate_text("2..5"));
        assert!(!SyntaxType::Ia5String.validate_text("caf\u{e9}"));
        assert!(SyntaxType::Json.validate_text("{\"a\": 1}"));
        assert!(!SyntaxType::Json.validate_text("{a"));
    }

    #[test]
    fn test_binary_value() {
        let a = Value::new_binary(vec![0, 1, 2]);
        let b = Value::new_binary(vec![0, 1, 2]);
        assert_eq!(a, b);
        assert!(a.as_str().is_none());
        assert_eq!(a.to_raw(), RawValue::Binary(vec![0, 1, 2]));
    }
}
