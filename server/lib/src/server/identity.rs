//! Contains structures related to the Identity that initiated an operation. This
//! is important for access controls and audits.

use std::fmt;

use crate::prelude::*;

/// How strongly a session proved who it is. Ordered, so a tuple requiring `Simple`
/// is satisfied by `Strong`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AuthenticationLevel {
    #[default]
    None,
    Simple,
    Strong,
}

impl AuthenticationLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Some(AuthenticationLevel::None),
            "simple" => Some(AuthenticationLevel::Simple),
            "strong" => Some(AuthenticationLevel::Strong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentType {
    /// The service itself, for bootstrap and internal maintenance.
    Internal,
    User {
        dn: Dn,
        admin: bool,
    },
    Anonymous,
}

/// The identity of the caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub origin: IdentType,
    pub auth_level: AuthenticationLevel,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            IdentType::Internal => write!(f, "Internal"),
            IdentType::User { dn, admin: true } => write!(f, "Admin({})", dn),
            IdentType::User { dn, .. } => write!(f, "User({})", dn),
            IdentType::Anonymous => write!(f, "Anonymous"),
        }
    }
}

impl Identity {
    pub fn internal() -> Self {
        Identity {
            origin: IdentType::Internal,
            auth_level: AuthenticationLevel::Strong,
        }
    }

    pub fn anonymous() -> Self {
        Identity {
            origin: IdentType::Anonymous,
            auth_level: AuthenticationLevel::None,
        }
    }

    pub fn user(dn: Dn, admin: bool, auth_level: AuthenticationLevel) -> Self {
        Identity {
            origin: IdentType::User { dn, admin },
            auth_level,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.origin, IdentType::Internal)
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self.origin, IdentType::Anonymous)
    }

    /// Internal operations and the administrator pass every access check.
    pub fn is_admin(&self) -> bool {
        match &self.origin {
            IdentType::Internal => true,
            IdentType::User { admin, .. } => *admin,
            IdentType::Anonymous => false,
        }
    }

    /// The normalised DN of the user, if there is one.
    pub fn dn(&self) -> Option<&Dn> {
        match &self.origin {
            IdentType::User { dn, .. } => Some(dn),
            _ => None,
        }
    }

    /// The name recorded in creatorsName and modifiersName.
    pub fn principal_name(&self) -> String {
        match &self.origin {
            IdentType::Internal => DN_ADMIN.to_string(),
            IdentType::User { dn, .. } => dn.to_string(),
            IdentType::Anonymous => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthenticationLevel, Identity};
    use crate::prelude::*;

    #[test]
    fn test_identity_kinds() {
        assert!(Identity::internal().is_admin());
        assert!(!Identity::anonymous().is_admin());
        let dn = Dn::parse("uid=bob,ou=users,ou=system").unwrap();
        let u = Identity::user(dn.clone(), false, AuthenticationLevel::Simple);
        assert_eq!(u.dn(), Some(&dn));
        assert!(!u.is_admin());
        assert_eq!(u.to_string(), "User(uid=bob,ou=users,ou=system)");
        assert!(AuthenticationLevel::Strong > AuthenticationLevel::Simple);
        assert_eq!(
            AuthenticationLevel::parse("SIMPLE"),
            Some(AuthenticationLevel::Simple)
        );
    }
}
