//! LDIF (RFC 2849) content and change records. The change recorder and journal render
//! records here, and the bootstrap entries and reverse records are parsed back from
//! this form.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::modify::{ModifyOp, RawModify};
use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdifRecord {
    /// A plain entry with no changetype.
    Content(EntryInit),
    Add(EntryInit),
    Delete {
        dn: String,
    },
    Modify {
        dn: String,
        mods: Vec<RawModify>,
    },
    ModDn {
        dn: String,
        new_rdn: String,
        delete_old_rdn: bool,
        new_superior: Option<String>,
    },
}

impl LdifRecord {
    pub fn dn(&self) -> &str {
        match self {
            LdifRecord::Content(e) | LdifRecord::Add(e) => e.dn(),
            LdifRecord::Delete { dn }
            | LdifRecord::Modify { dn, .. }
            | LdifRecord::ModDn { dn, .. } => dn.as_str(),
        }
    }

    pub fn changetype(&self) -> &'static str {
        match self {
            LdifRecord::Content(_) | LdifRecord::Add(_) => "add",
            LdifRecord::Delete { .. } => "delete",
            LdifRecord::Modify { .. } => "modify",
            LdifRecord::ModDn {
                new_superior: None, ..
            } => "modrdn",
            LdifRecord::ModDn { .. } => "moddn",
        }
    }
}

// SAFE-STRING from RFC 2849.
fn is_safe(v: &[u8]) -> bool {
    match v.first() {
        None => true,
        Some(b' ') | Some(b':') | Some(b'<') => false,
        Some(_) => {
            v.last() != Some(&b' ')
                && v.iter()
                    .all(|b| *b != 0 && *b != b'\n' && *b != b'\r' && *b < 0x80)
        }
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, attr: &str, v: &RawValue) -> fmt::Result {
    match v {
        RawValue::Text(s) if is_safe(s.as_bytes()) => writeln!(f, "{}: {}", attr, s),
        _ => writeln!(f, "{}:: {}", attr, STANDARD.encode(v.as_bytes())),
    }
}

impl fmt::Display for LdifRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_line(f, "dn", &RawValue::from(self.dn()))?;
        match self {
            LdifRecord::Content(e) => {
                for (a, v) in e.attrs() {
                    write_line(f, a, v)?;
                }
            }
            LdifRecord::Add(e) => {
                writeln!(f, "changetype: add")?;
                for (a, v) in e.attrs() {
                    write_line(f, a, v)?;
                }
            }
            LdifRecord::Delete { .. } => {
                writeln!(f, "changetype: delete")?;
            }
            LdifRecord::Modify { mods, .. } => {
                writeln!(f, "changetype: modify")?;
                for m in mods.iter() {
                    let op = match m.op {
                        ModifyOp::Add => "add",
                        ModifyOp::Replace => "replace",
                        ModifyOp::Remove => "delete",
                    };
                    writeln!(f, "{}: {}", op, m.attr)?;
                    for v in m.values.iter() {
                        write_line(f, &m.attr, v)?;
                    }
                    writeln!(f, "-")?;
                }
            }
            LdifRecord::ModDn {
                new_rdn,
                delete_old_rdn,
                new_superior,
                ..
            } => {
                writeln!(f, "changetype: {}", self.changetype())?;
                write_line(f, "newrdn", &RawValue::from(new_rdn.as_str()))?;
                writeln!(f, "deleteoldrdn: {}", if *delete_old_rdn { 1 } else { 0 })?;
                if let Some(sup) = new_superior {
                    write_line(f, "newsuperior", &RawValue::from(sup.as_str()))?;
                }
            }
        }
        Ok(())
    }
}

/// Render records separated by blank lines.
pub fn to_ldif(records: &[LdifRecord]) -> String {
    records
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_err(msg: &str) -> OperationError {
    OperationError::LdifParseError(msg.to_string())
}

// Split `attr: value`, `attr:: base64` into the name and raw value.
fn parse_line(line: &str) -> Result<(AttrString, RawValue), OperationError> {
    if line.trim() == "-" {
        return Ok(("-".into(), RawValue::Text(String::new())));
    }
    let idx = line
        .find(':')
        .ok_or_else(|| parse_err(&format!("missing separator: {}", line)))?;
    let attr = line[..idx].trim();
    if attr.is_empty() {
        return Err(parse_err(line));
    }
    let rest = &line[idx + 1..];
    let value = if let Some(b64) = rest.strip_prefix(':') {
        let bytes = STANDARD
            .decode(b64.trim())
            .map_err(|_| parse_err(&format!("invalid base64: {}", line)))?;
        match String::from_utf8(bytes) {
            Ok(s) => RawValue::Text(s),
            Err(e) => RawValue::Binary(e.into_bytes()),
        }
    } else if rest.starts_with('<') {
        return Err(parse_err("url values are not supported"));
    } else {
        RawValue::Text(rest.trim_start_matches(' ').to_string())
    };
    Ok((attr.into(), value))
}

fn text(v: &RawValue) -> Result<&str, OperationError> {
    v.as_text().ok_or_else(|| parse_err("expected a text value"))
}

fn parse_record(lines: &[String]) -> Result<LdifRecord, OperationError> {
    let mut it = lines.iter().map(|l| parse_line(l)).peekable();
    let (a, dn) = it.next().ok_or_else(|| parse_err("empty record"))??;
    if !a.eq_ignore_ascii_case("dn") {
        return Err(parse_err("record does not start with dn"));
    }
    let dn = text(&dn)?.to_string();

    let changetype = match it.peek() {
        Some(Ok((a, v))) if a.eq_ignore_ascii_case("changetype") => {
            let ct = text(v)?.trim().to_lowercase();
            it.next();
            Some(ct)
        }
        _ => None,
    };

    match changetype.as_deref() {
        None | Some("add") => {
            let mut e = EntryInit::new(&dn);
            for r in it {
                let (a, v) = r?;
                e.add_ava(&a, v);
            }
            Ok(if changetype.is_none() {
                LdifRecord::Content(e)
            } else {
                LdifRecord::Add(e)
            })
        }
        Some("delete") => Ok(LdifRecord::Delete { dn }),
        Some("modify") => {
            let mut mods = Vec::new();
            let mut current: Option<RawModify> = None;
            for r in it {
                let (a, v) = r?;
                if a.as_str() == "-" {
                    if let Some(m) = current.take() {
                        mods.push(m);
                    }
                    continue;
                }
                match current.as_mut() {
                    None => {
                        let op = match a.to_lowercase().as_str() {
                            "add" => ModifyOp::Add,
                            "replace" => ModifyOp::Replace,
                            "delete" => ModifyOp::Remove,
                            _ => return Err(parse_err(&format!("unknown modify op: {}", a))),
                        };
                        current = Some(RawModify {
                            op,
                            attr: text(&v)?.trim().into(),
                            values: Vec::new(),
                        });
                    }
                    Some(m) => {
                        if !a.eq_ignore_ascii_case(&m.attr) {
                            return Err(parse_err(&format!(
                                "value for {} inside {} block",
                                a, m.attr
                            )));
                        }
                        m.values.push(v);
                    }
                }
            }
            if let Some(m) = current.take() {
                mods.push(m);
            }
            Ok(LdifRecord::Modify { dn, mods })
        }
        Some("modrdn") | Some("moddn") => {
            let mut new_rdn = None;
            let mut delete_old_rdn = false;
            let mut new_superior = None;
            for r in it {
                let (a, v) = r?;
                match a.to_lowercase().as_str() {
                    "newrdn" => new_rdn = Some(text(&v)?.to_string()),
                    "deleteoldrdn" => delete_old_rdn = text(&v)?.trim() == "1",
                    "newsuperior" => new_superior = Some(text(&v)?.to_string()),
                    _ => return Err(parse_err(&format!("unexpected {} in moddn", a))),
                }
            }
            Ok(LdifRecord::ModDn {
                dn,
                new_rdn: new_rdn.ok_or_else(|| parse_err("moddn without newrdn"))?,
                delete_old_rdn,
                new_superior,
            })
        }
        Some(other) => Err(parse_err(&format!("unknown changetype: {}", other))),
    }
}

/// Parse LDIF text into records.
pub fn parse_ldif(input: &str) -> Result<Vec<LdifRecord>, OperationError> {
    let mut records = Vec::new();
    let mut lines: Vec<String> = Vec::new();

    for raw in input.lines() {
        let raw = raw.trim_end_matches('\r');
        if raw.is_empty() {
            if !lines.is_empty() {
                records.push(parse_record(&lines)?);
                lines.clear();
            }
            continue;
        }
        if raw.starts_with('#') {
            continue;
        }
        if let Some(cont) = raw.strip_prefix(' ') {
            // Folded continuation of the previous line.
            match lines.last_mut() {
                Some(prev) => prev.push_str(cont),
                None => return Err(parse_err("continuation without a line")),
            }
            continue;
        }
        if lines.is_empty() && raw.to_lowercase().starts_with("version:") {
            continue;
        }
        lines.push(raw.to_string());
    }
    if !lines.is_empty() {
        records.push(parse_record(&lines)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::{parse_ldif, to_ldif, LdifRecord};
    use crate::modify::{m_add, m_purge, m_replace};
    use crate::prelude::*;

    #[test]
    fn test_ldif_render_add_and_modify() {
        let ei = entry_init!(
            "cn=test,ou=system",
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_CN, "test"),
            (ATTR_SN, " leading space"),
            (ATTR_USER_PASSWORD, vec![0u8, 1, 2])
        );
        let s = LdifRecord::Add(ei).to_string();
        assert_eq!(
            s,
            "dn: cn=test,ou=system\nchangetype: add\nobjectClass: person\ncn: test\nsn:: IGxlYWRpbmcgc3BhY2U=\nuserPassword:: AAEC\n"
        );

        let m = LdifRecord::Modify {
            dn: "cn=test,ou=system".to_string(),
            mods: vec![m_add(ATTR_DESCRIPTION, &["a", "b"]), m_purge(ATTR_SN)],
        };
        assert_eq!(
            m.to_string(),
            "dn: cn=test,ou=system\nchangetype: modify\nadd: description\ndescription: a\ndescription: b\n-\ndelete: sn\n-\n"
        );
    }

    #[test]
    fn test_ldif_parse() {
        let input = r#"version: 1
# a comment
dn: ou=people,dc=example,dc=com
objectClass: organizationalUnit
ou: people
description: a long
  folded value

dn: cn=a,ou=people,dc=example,dc=com
changetype: modify
replace: sn
sn: B
-
delete: description
-

dn: cn=a,ou=people,dc=example,dc=com
changetype: modrdn
newrdn: cn=b
deleteoldrdn: 1
newsuperior: dc=example,dc=com

dn: cn=b,dc=example,dc=com
changetype: delete
"#;
        let recs = parse_ldif(input).unwrap();
        assert_eq!(recs.len(), 4);
        match &recs[0] {
            LdifRecord::Content(e) => {
                assert_eq!(e.dn(), "ou=people,dc=example,dc=com");
                assert_eq!(e.attrs().len(), 3);
                assert_eq!(e.attrs()[2].1, RawValue::from("a long folded value"));
            }
            _ => panic!("expected content"),
        }
        assert_eq!(
            recs[1],
            LdifRecord::Modify {
                dn: "cn=a,ou=people,dc=example,dc=com".to_string(),
                mods: vec![m_replace(ATTR_SN, &["B"]), m_purge(ATTR_DESCRIPTION)],
            }
        );
        assert_eq!(recs[2].changetype(), "moddn");
        assert_eq!(recs[3].changetype(), "delete");

        // Rendering and parsing again gives the same records.
        let again = parse_ldif(&to_ldif(&recs[1..])).unwrap();
        assert_eq!(&again[..], &recs[1..]);
    }

    #[test]
    fn test_ldif_parse_errors() {
        assert!(parse_ldif("cn: x\n").is_err());
        assert!(parse_ldif("dn: cn=x\nchangetype: frob\n").is_err());
        assert!(parse_ldif("dn: cn=x\nchangetype: modify\nfrob: sn\n").is_err());
        assert!(parse_ldif("dn: cn=x\nsn:: ***\n").is_err());
    }
}
