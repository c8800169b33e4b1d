//! Subtree specifications, which decide the entries a subentry applies to.
//!
//! The specification is held in `subtreeSpecification` as JSON, for example
//! `{"base": "ou=people", "chopBefore": ["ou=contractors,ou=people"], "maximum": 1}`.
//! The base and the chop names are relative to the administrative point, which is the
//! parent of the subentry.

use serde::{Deserialize, Serialize};

use crate::prelude::*;
use crate::schema::SchemaTransaction;

/// A refinement over the object classes of an entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Refinement {
    Item(String),
    And(Vec<Refinement>),
    Or(Vec<Refinement>),
    Not(Box<Refinement>),
}

impl Refinement {
    pub fn matches<STATE>(&self, e: &Entry<STATE>) -> bool {
        match self {
            Refinement::Item(class) => e.has_class(class),
            Refinement::And(l) => l.iter().all(|r| r.matches(e)),
            Refinement::Or(l) => l.iter().any(|r| r.matches(e)),
            Refinement::Not(r) => !r.matches(e),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubtreeSpecification {
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub chop_before: Vec<String>,
    #[serde(default)]
    pub chop_after: Vec<String>,
    #[serde(default)]
    pub minimum: usize,
    #[serde(default)]
    pub maximum: Option<usize>,
    #[serde(default)]
    pub refinement: Option<Refinement>,
}

impl SubtreeSpecification {
    pub fn parse(s: &str) -> Result<Self, OperationError> {
        serde_json::from_str(s).map_err(|e| {
            admin_error!(?e, "invalid subtree specification");
            OperationError::InvalidSubtreeSpecification(e.to_string())
        })
    }

    /// Anchor the relative names at the administrative point.
    pub fn resolve<S: SchemaTransaction + ?Sized>(
        &self,
        admin_point: &Dn,
        schema: &S,
    ) -> Result<ResolvedSubtree, OperationError> {
        let relative = |s: &str| -> Result<Dn, OperationError> {
            Dn::parse(s)
                .and_then(|dn| dn.normalized(schema))
                .map_err(|_| OperationError::InvalidSubtreeSpecification(s.to_string()))
        };
        let base = relative(&self.base)?.concat(admin_point);
        let chop_before = self
            .chop_before
            .iter()
            .map(|s| relative(s).map(|dn| dn.concat(&base)))
            .collect::<Result<Vec<_>, _>>()?;
        let chop_after = self
            .chop_after
            .iter()
            .map(|s| relative(s).map(|dn| dn.concat(&base)))
            .collect::<Result<Vec<_>, _>>()?;
        if matches!(self.maximum, Some(max) if max < self.minimum) {
            return Err(OperationError::InvalidSubtreeSpecification(
                "maximum is below minimum".to_string(),
            ));
        }
        Ok(ResolvedSubtree {
            base,
            chop_before,
            chop_after,
            minimum: self.minimum,
            maximum: self.maximum,
            refinement: self.refinement.clone(),
        })
    }
}

/// A subtree specification anchored in the DIT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSubtree {
    pub base: Dn,
    chop_before: Vec<Dn>,
    chop_after: Vec<Dn>,
    minimum: usize,
    maximum: Option<usize>,
    refinement: Option<Refinement>,
}

impl ResolvedSubtree {
    /// True when the name falls within the subtree, ignoring the refinement.
    pub fn contains_dn(&self, dn: &Dn) -> bool {
        if !dn.is_descendant_or_self(&self.base) {
            return false;
        }
        let depth = dn.len() - self.base.len();
        if depth < self.minimum || matches!(self.maximum, Some(max) if depth > max) {
            return false;
        }
        // chopBefore removes the named entry and its subordinates, chopAfter only
        // the subordinates.
        if self.chop_before.iter().any(|c| dn.is_descendant_or_self(c)) {
            return false;
        }
        !self.chop_after.iter().any(|c| dn.is_descendant_of(c))
    }

    pub fn contains<STATE>(&self, e: &Entry<STATE>) -> bool {
        self.contains_dn(e.dn())
            && self
                .refinement
                .as_ref()
                .map(|r| r.matches(e))
                .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{Refinement, SubtreeSpecification};
    use crate::prelude::*;

    #[test]
    fn test_subtree_spec_parse() {
        let ss = SubtreeSpecification::parse(
            r#"{"base": "ou=people", "chopAfter": ["ou=a,ou=people"], "minimum": 1, "refinement": {"item": "person"}}"#,
        )
        .unwrap();
        assert_eq!(ss.base, "ou=people");
        assert_eq!(ss.minimum, 1);
        assert_eq!(ss.refinement, Some(Refinement::Item("person".to_string())));
        assert_eq!(SubtreeSpecification::parse("{}").unwrap(), SubtreeSpecification::default());
        assert!(SubtreeSpecification::parse(r#"{"bsae": ""}"#).is_err());
    }

    #[test]
    fn test_subtree_contains() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();
        let ap = Dn::parse("dc=example,dc=com")
            .unwrap()
            .normalized(&schema_ro)
            .unwrap();
        let ss = SubtreeSpecification {
            base: "ou=people".to_string(),
            chop_before: vec!["ou=gone".to_string()],
            chop_after: vec!["ou=flat".to_string()],
            minimum: 1,
            maximum: Some(2),
            refinement: None,
        };
        let rs = ss.resolve(&ap, &schema_ro).unwrap();
        let dn = |s: &str| Dn::parse(s).unwrap().normalized(&schema_ro).unwrap();

        assert!(!rs.contains_dn(&dn("ou=people,dc=example,dc=com")));
        assert!(rs.contains_dn(&dn("cn=a,ou=people,dc=example,dc=com")));
        assert!(rs.contains_dn(&dn("cn=b,ou=x,ou=people,dc=example,dc=com")));
        assert!(!rs.contains_dn(&dn("cn=c,ou=y,ou=x,ou=people,dc=example,dc=com")));
        assert!(!rs.contains_dn(&dn("ou=gone,ou=people,dc=example,dc=com")));
        assert!(!rs.contains_dn(&dn("cn=d,ou=gone,ou=people,dc=example,dc=com")));
        assert!(rs.contains_dn(&dn("ou=flat,ou=people,dc=example,dc=com")));
        assert!(!rs.contains_dn(&dn("cn=e,ou=flat,ou=people,dc=example,dc=com")));
        assert!(!rs.contains_dn(&dn("cn=a,dc=example,dc=com")));
    }

    #[test]
    fn test_subtree_refinement() {
        let schema = Schema::new().unwrap();
        let schema_ro = schema.read();
        let ss = SubtreeSpecification::parse(
            r#"{"refinement": {"and": [{"item": "person"}, {"not": {"item": "inetOrgPerson"}}]}}"#,
        )
        .unwrap();
        let ap = Dn::parse("dc=example,dc=com")
            .unwrap()
            .normalized(&schema_ro)
            .unwrap();
        let rs = ss.resolve(&ap, &schema_ro).unwrap();

        let person = entry_init!(
            "cn=a,dc=example,dc=com",
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_CN, "a"),
            (ATTR_SN, "a")
        )
        .into_entry(&schema_ro)
        .unwrap();
        let inet = entry_init!(
            "cn=b,dc=example,dc=com",
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_OBJECTCLASS, CLASS_INET_ORG_PERSON),
            (ATTR_CN, "b"),
            (ATTR_SN, "b")
        )
        .into_entry(&schema_ro)
        .unwrap();
        assert!(rs.contains(&person));
        assert!(!rs.contains(&inet));
    }
}
