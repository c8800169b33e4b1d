//! Distinguished names as described by RFC 4514.
//!
//! A [`Dn`] is held leaf first. Every [`Ava`] keeps the type and value as the client
//! wrote them alongside a normalised `(oid, value)` pair, and all comparison, hashing
//! and ordering is done on the normalised pair only. Until a name has been normalised
//! against the schema the normalised pair is a lower case approximation, which is
//! sufficient for names built from well known types.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::prelude::*;
use crate::schema::SchemaTransaction;

/// One attribute value assertion of an RDN, for example `cn=William`.
#[derive(Debug, Clone)]
pub struct Ava {
    attr: AttrString,
    value: String,
    oid: AttrString,
    norm: String,
}

impl Ava {
    pub fn new(attr: &str, value: &str) -> Self {
        Ava {
            attr: attr.trim().into(),
            value: value.to_string(),
            oid: attr.trim().to_lowercase().into(),
            norm: value.trim().to_lowercase(),
        }
    }

    /// The attribute type as provided.
    pub fn attr(&self) -> &str {
        self.attr.as_str()
    }

    /// The unescaped value as provided.
    pub fn value(&self) -> &str {
        self.value.as_str()
    }

    pub fn oid(&self) -> &str {
        self.oid.as_str()
    }

    pub fn norm(&self) -> &str {
        self.norm.as_str()
    }

    fn normalize<S: SchemaTransaction + ?Sized>(&mut self, schema: &S) -> Result<(), OperationError> {
        let sa = schema
            .resolve_attribute(self.attr.as_str())
            .ok_or_else(|| OperationError::InvalidDnSyntax(format!("{}={}", self.attr, self.value)))?;
        self.oid = sa.oid.clone();
        self.norm = sa.equality.normalize_text(&self.value)?;
        Ok(())
    }

    fn write_norm(&self, out: &mut String) {
        out.push_str(self.oid.as_str());
        out.push('=');
        out.push_str(&escape_value(&self.norm));
    }
}

impl PartialEq for Ava {
    fn eq(&self, other: &Self) -> bool {
        self.oid == other.oid && self.norm == other.norm
    }
}

impl Eq for Ava {}

impl PartialOrd for Ava {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ava {
    fn cmp(&self, other: &Self) -> Ordering {
        self.oid
            .cmp(&other.oid)
            .then_with(|| self.norm.cmp(&other.norm))
    }
}

impl Hash for Ava {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.oid.hash(state);
        self.norm.hash(state);
    }
}

impl fmt::Display for Ava {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr, escape_value(&self.value))
    }
}

/// A relative distinguished name. Multi valued RDNs keep their assertions sorted so
/// that `cn=a+sn=b` and `sn=b+cn=a` are the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    pub fn new(attr: &str, value: &str) -> Self {
        Rdn {
            avas: vec![Ava::new(attr, value)],
        }
    }

    fn from_avas(mut avas: Vec<Ava>) -> Self {
        avas.sort();
        Rdn { avas }
    }

    pub fn parse(s: &str) -> Result<Self, OperationError> {
        let dn = Dn::parse(s)?;
        match dn.rdns.len() {
            1 => dn.rdns.into_iter().next().ok_or(OperationError::InvalidState),
            _ => Err(OperationError::InvalidDnSyntax(s.to_string())),
        }
    }

    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    pub fn len(&self) -> usize {
        self.avas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.avas.is_empty()
    }

    /// The single assertion of a simple RDN, or the first of a multi valued one.
    pub fn first_ava(&self) -> Option<&Ava> {
        self.avas.first()
    }

    pub fn normalize<S: SchemaTransaction + ?Sized>(&mut self, schema: &S) -> Result<(), OperationError> {
        for ava in self.avas.iter_mut() {
            ava.normalize(schema)?;
        }
        self.avas.sort();
        Ok(())
    }

    pub fn to_norm_string(&self) -> String {
        let mut out = String::new();
        self.write_norm(&mut out);
        out
    }

    fn write_norm(&self, out: &mut String) {
        for (i, ava) in self.avas.iter().enumerate() {
            if i > 0 {
                out.push('+');
            }
            ava.write_norm(out);
        }
    }
}

impl PartialOrd for Rdn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rdn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.avas
            .len()
            .cmp(&other.avas.len())
            .then_with(|| self.avas.cmp(&other.avas))
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ava) in self.avas.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{}", ava)?;
        }
        Ok(())
    }
}

/// A distinguished name, leaf RDN first. The empty name is the root DSE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

fn is_type_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_'
}

const ESCAPABLE: &[char] = &[' ', '"', '#', '+', ',', ';', '<', '=', '>', '\\'];

fn escape_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    let last = v.chars().count().saturating_sub(1);
    for (i, c) in v.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

impl Dn {
    pub fn root() -> Self {
        Dn { rdns: Vec::new() }
    }

    /// Build a name from RDNs given leaf first.
    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Dn { rdns }
    }

    pub fn parse(s: &str) -> Result<Self, OperationError> {
        let err = || OperationError::InvalidDnSyntax(s.to_string());
        if s.trim().is_empty() {
            return Ok(Dn::root());
        }

        let chars: Vec<char> = s.chars().collect();
        let len = chars.len();
        let mut i = 0;
        let mut rdns = Vec::new();
        let mut avas = Vec::new();

        loop {
            // The attribute type.
            while i < len && chars[i] == ' ' {
                i += 1;
            }
            let start = i;
            while i < len && chars[i] != '=' {
                i += 1;
            }
            if i >= len {
                return Err(err());
            }
            let attr: String = chars[start..i].iter().collect();
            let attr = attr.trim();
            if attr.is_empty() || !attr.chars().all(is_type_char) {
                return Err(err());
            }
            // Skip the '=' and any unescaped leading space.
            i += 1;
            while i < len && chars[i] == ' ' {
                i += 1;
            }

            // The value. Trailing unescaped spaces are not significant.
            let mut buf: Vec<u8> = Vec::new();
            let mut significant = 0;
            let quoted = i < len && chars[i] == '"';
            if quoted {
                i += 1;
            }
            while i < len {
                let c = chars[i];
                match c {
                    '\\' => {
                        let n = *chars.get(i + 1).ok_or_else(err)?;
                        let hex = chars
                            .get(i + 2)
                            .filter(|h| n.is_ascii_hexdigit() && h.is_ascii_hexdigit());
                        if let Some(h) = hex {
                            let byte = u8::from_str_radix(&format!("{}{}", n, h), 16)
                                .map_err(|_| err())?;
                            buf.push(byte);
                            i += 3;
                        } else if ESCAPABLE.contains(&n) {
                            let mut tmp = [0u8; 4];
                            buf.extend_from_slice(n.encode_utf8(&mut tmp).as_bytes());
                            i += 2;
                        } else {
                            return Err(err());
                        }
                        significant = buf.len();
                    }
                    '"' if quoted => {
                        i += 1;
                        significant = buf.len();
                        while i < len && chars[i] == ' ' {
                            i += 1;
                        }
                        break;
                    }
                    ',' | ';' | '+' if !quoted => break,
                    _ => {
                        let mut tmp = [0u8; 4];
                        buf.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
                        i += 1;
                        if c != ' ' {
                            significant = buf.len();
                        }
                    }
                }
            }
            buf.truncate(significant);
            let value = String::from_utf8(buf).map_err(|_| err())?;
            avas.push(Ava::new(attr, &value));

            if i >= len {
                rdns.push(Rdn::from_avas(std::mem::take(&mut avas)));
                break;
            }
            match chars[i] {
                '+' => {
                    i += 1;
                }
                ',' | ';' => {
                    rdns.push(Rdn::from_avas(std::mem::take(&mut avas)));
                    i += 1;
                    if i >= len {
                        return Err(err());
                    }
                }
                _ => return Err(err()),
            }
        }

        Ok(Dn { rdns })
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// The leaf RDN.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Dn {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Dn { rdns }
    }

    /// The ancestor (or self) holding the `len` right most RDNs.
    pub fn ancestor(&self, len: usize) -> Option<Dn> {
        if len > self.rdns.len() {
            None
        } else {
            Some(Dn {
                rdns: self.rdns[self.rdns.len() - len..].to_vec(),
            })
        }
    }

    /// True if `self` is below `other`, or is `other`.
    pub fn is_descendant_or_self(&self, other: &Dn) -> bool {
        self.rdns.len() >= other.rdns.len()
            && self.rdns[self.rdns.len() - other.rdns.len()..] == other.rdns[..]
    }

    /// True if `self` is strictly below `other`.
    pub fn is_descendant_of(&self, other: &Dn) -> bool {
        self.rdns.len() > other.rdns.len() && self.is_descendant_or_self(other)
    }

    pub fn is_parent_of(&self, other: &Dn) -> bool {
        other.rdns.len() == self.rdns.len() + 1 && other.is_descendant_of(self)
    }

    /// The RDNs of `self` below `base`, leaf first, if `self` is within `base`.
    pub fn relative_to(&self, base: &Dn) -> Option<&[Rdn]> {
        if self.is_descendant_or_self(base) {
            Some(&self.rdns[..self.rdns.len() - base.rdns.len()])
        } else {
            None
        }
    }

    /// Move this name from below `old_base` to below `new_base`.
    pub fn rebase(&self, old_base: &Dn, new_base: &Dn) -> Option<Dn> {
        self.relative_to(old_base).map(|rel| {
            let mut rdns = rel.to_vec();
            rdns.extend(new_base.rdns.iter().cloned());
            Dn { rdns }
        })
    }

    /// Append the RDNs of `suffix` below this relative name.
    pub fn concat(&self, suffix: &Dn) -> Dn {
        let mut rdns = self.rdns.clone();
        rdns.extend(suffix.rdns.iter().cloned());
        Dn { rdns }
    }

    pub fn normalize<S: SchemaTransaction + ?Sized>(&mut self, schema: &S) -> Result<(), OperationError> {
        for rdn in self.rdns.iter_mut() {
            rdn.normalize(schema)?;
        }
        Ok(())
    }

    pub fn normalized<S: SchemaTransaction + ?Sized>(mut self, schema: &S) -> Result<Self, OperationError> {
        self.normalize(schema)?;
        Ok(self)
    }

    /// The normalised string form, `oid=value` per assertion.
    pub fn to_norm_string(&self) -> String {
        let mut out = String::new();
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            rdn.write_norm(&mut out);
        }
        out
    }

    /// Render with the schema's declared attribute names and the user values.
    pub fn to_canonical_string<S: SchemaTransaction + ?Sized>(&self, schema: &S) -> String {
        self.rdns
            .iter()
            .map(|rdn| {
                rdn.avas
                    .iter()
                    .map(|ava| {
                        let name = schema
                            .resolve_attribute(ava.attr())
                            .map(|sa| sa.name().to_string())
                            .unwrap_or_else(|| ava.attr().to_string());
                        format!("{}={}", name, escape_value(ava.value()))
                    })
                    .collect::<Vec<_>>()
                    .join("+")
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    // Root side first, so an ancestor always sorts before its descendants.
    fn cmp(&self, other: &Self) -> Ordering {
        self.rdns.iter().rev().cmp(other.rdns.iter().rev())
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", rdn)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Dn {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dn::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::{Dn, Rdn};
    use crate::schema::{Schema, SchemaTransaction};

    #[test]
    fn test_dn_parse_basic() {
        let dn = Dn::parse("cn=test, ou=system").unwrap();
        assert_eq!(dn.len(), 2);
        assert_eq!(dn.rdn().unwrap().first_ava().unwrap().value(), "test");
        assert_eq!(dn.to_string(), "cn=test,ou=system");
        assert!(Dn::parse("").unwrap().is_root());
    }

    #[test]
    fn test_dn_parse_escapes() {
        let dn = Dn::parse(r"cn=Smith\, John,ou=people").unwrap();
        assert_eq!(dn.rdn().unwrap().first_ava().unwrap().value(), "Smith, John");
        let dn = Dn::parse(r"cn=\41lice\20,ou=people").unwrap();
        assert_eq!(dn.rdn().unwrap().first_ava().unwrap().value(), "Alice ");
        let dn = Dn::parse(r#"cn="a,b",o=x"#).unwrap();
        assert_eq!(dn.rdn().unwrap().first_ava().unwrap().value(), "a,b");
        // Round trips through display escaping.
        let dn = Dn::parse(r"cn=\#hash\ ,o=x").unwrap();
        let again = Dn::parse(&dn.to_string()).unwrap();
        assert_eq!(dn, again);
    }

    #[test]
    fn test_dn_parse_invalid() {
        assert!(Dn::parse("cn").is_err());
        assert!(Dn::parse("cn=a,").is_err());
        assert!(Dn::parse("=a").is_err());
        assert!(Dn::parse(r"cn=a\q").is_err());
        assert!(Dn::parse("c n=a").is_err());
    }

    #[test]
    fn test_dn_multivalued_rdn() {
        let a = Dn::parse("cn=a+sn=b,o=x").unwrap();
        let b = Dn::parse("sn=B+CN=A,o=x").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.rdn().unwrap().len(), 2);
    }

    #[test]
    fn test_dn_relations() {
        let base = Dn::parse("ou=system").unwrap();
        let child = Dn::parse("ou=users,ou=system").unwrap();
        let grandchild = Dn::parse("uid=u,ou=users,ou=system").unwrap();
        assert!(grandchild.is_descendant_of(&base));
        assert!(!base.is_descendant_of(&base));
        assert!(base.is_descendant_or_self(&base));
        assert!(base.is_parent_of(&child));
        assert!(!base.is_parent_of(&grandchild));
        assert_eq!(grandchild.parent().unwrap(), child);
        assert_eq!(grandchild.ancestor(1).unwrap(), base);

        let moved = grandchild
            .rebase(&child, &Dn::parse("ou=groups,ou=system").unwrap())
            .unwrap();
        assert_eq!(moved.to_string(), "uid=u,ou=groups,ou=system");
        assert!(base < child);
    }

    #[test]
    fn test_dn_schema_normalization() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();
        let a = Dn::parse("CN=Test, OU=System")
            .unwrap()
            .normalized(&schema_ro)
            .unwrap();
        let b = Dn::parse("commonName=test,ou=system")
            .unwrap()
            .normalized(&schema_ro)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_norm_string(), "2.5.4.3=test,2.5.4.11=system");
        assert_eq!(a.to_canonical_string(&schema_ro), "cn=Test,ou=System");
        assert!(Dn::parse("nosuchattr=x")
            .unwrap()
            .normalized(&schema_ro)
            .is_err());
    }

    #[test]
    fn test_rdn_ordering() {
        let a = Rdn::parse("cn=a").unwrap();
        let b = Rdn::parse("cn=b").unwrap();
        let ab = Rdn::parse("cn=a+sn=b").unwrap();
        assert!(a < b);
        // Fewer assertions sort first.
        assert!(b < ab);
    }
}
