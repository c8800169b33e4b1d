use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/* ===== result codes ===== */

/// The LDAP result codes from RFC 4511 section 4.1.9, as surfaced to the protocol layer.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u16)]
pub enum LdapResultCode {
    Success = 0,
    OperationsError = 1,
    ProtocolError = 2,
    TimeLimitExceeded = 3,
    SizeLimitExceeded = 4,
    CompareFalse = 5,
    CompareTrue = 6,
    AuthMethodNotSupported = 7,
    StrongerAuthRequired = 8,
    Referral = 10,
    AdminLimitExceeded = 11,
    UnavailableCriticalExtension = 12,
    ConfidentialityRequired = 13,
    SaslBindInProgress = 14,
    NoSuchAttribute = 16,
    UndefinedAttributeType = 17,
    InappropriateMatching = 18,
    ConstraintViolation = 19,
    AttributeOrValueExists = 20,
    InvalidAttributeSyntax = 21,
    NoSuchObject = 32,
    AliasProblem = 33,
    InvalidDnSyntax = 34,
    AliasDereferencingProblem = 36,
    InappropriateAuthentication = 48,
    InvalidCredentials = 49,
    InsufficientAccessRights = 50,
    Busy = 51,
    Unavailable = 52,
    UnwillingToPerform = 53,
    LoopDetect = 54,
    NamingViolation = 64,
    ObjectClassViolation = 65,
    NotAllowedOnNonLeaf = 66,
    NotAllowedOnRdn = 67,
    EntryAlreadyExists = 68,
    ObjectClassModsProhibited = 69,
    AffectsMultipleDsas = 71,
    Other = 80,
}

/* ===== errors ===== */
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum SchemaError {
    NoClassFound,
    InvalidClass(Vec<String>),
    NoStructuralClass,
    MultipleStructuralClasses(Vec<String>),
    MissingMustAttribute(Vec<String>),
    InvalidAttribute(String),
    InvalidAttributeSyntax(String),
    AttributeNotValidForClass(String),
    SingleValueViolation(String),
    CollectiveOnRegularEntry(String),
    EmptyFilter,
    Corrupted,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyError {
    Unknown,
    // Class, Attribute
    SchemaClassMissingAttribute(String, String),
    SchemaClassPhantomAttribute(String, String),
    SchemaClassMissingSuperior(String, String),
    SchemaNameNotUnique(String),
    // Partition, entry id
    EntryDnMismatch(String, u64),
    OrphanEntry(String, u64),
    RdnIndexCorrupt(String, u64),
    OneLevelIndexCorrupt(String, u64),
    SubLevelIndexCorrupt(String, u64),
    AliasIndexCorrupt(String, u64),
    PresenceIndexCorrupt(String, u64),
    // Partition, attribute, entry id
    AttributeIndexCorrupt(String, String, u64),
    IndexCountMismatch(String, String),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "lowercase")]
pub enum OperationError {
    // Name resolution.
    NoSuchObject { matched: Option<String> },
    NoSuchAttribute(String),
    EntryAlreadyExists(String),
    AttributeOrValueExists(String),
    InvalidDnSyntax(String),
    AliasProblem(String),
    AliasDereferencingProblem,
    Referral(Vec<String>),
    // Update semantics.
    SchemaViolation(SchemaError),
    InvalidAttributeSyntax(String),
    NotAllowedOnNonLeaf,
    NotAllowedOnRdn,
    NamingViolation(String),
    // Security.
    InsufficientAccessRights,
    InvalidCredentials,
    // Service and search limits.
    UnwillingToPerform(String),
    OperationsError(String),
    TimeLimitExceeded,
    SizeLimitExceeded,
    // Cursor state.
    InvalidCursorPosition,
    CursorClosed,
    UnsupportedOperation,
    // Internal faults.
    InvalidState,
    BackendEngine,
    CorruptedEntry(u64),
    CorruptedIndex(String),
    ConsistencyError(Vec<ConsistencyError>),
    InvalidAciItem(String),
    InvalidSubtreeSpecification(String),
    LdifParseError(String),
    InvalidConfiguration(String),
    SerdeJsonError,
    FsError,
}

impl PartialEq for OperationError {
    fn eq(&self, other: &Self) -> bool {
        // Only the kind is compared, the payloads are diagnostics. Generally we only use
        // the PartialEq for TESTING anyway.
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Display for OperationError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let mut output = format!("{:?}", self)
            .split("::")
            .last()
            .unwrap_or("")
            .to_string();

        if let Some(msg) = self.message() {
            output += &format!(" - {}", msg);
        };
        f.write_str(&output)
    }
}

impl OperationError {
    /// Return the message associated with the error if there is one.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::NoSuchObject { .. } => None,
            Self::NotAllowedOnNonLeaf => {
                Some("The entry has subordinates and can not be removed or moved.".into())
            }
            Self::NotAllowedOnRdn => {
                Some("The modification would remove a value used in the entry's RDN.".into())
            }
            Self::InsufficientAccessRights => {
                Some("The current identity is not permitted to perform this operation.".into())
            }
            Self::TimeLimitExceeded => {
                Some("The search did not complete within the time limit.".into())
            }
            Self::SizeLimitExceeded => {
                Some("The search returned more entries than the size limit allows.".into())
            }
            Self::InvalidCursorPosition => {
                Some("The cursor is not positioned on an available element.".into())
            }
            Self::CursorClosed => Some("The cursor has been closed.".into()),
            _ => None,
        }
    }

    /// The client visible result code classification of this error.
    pub fn result_code(&self) -> LdapResultCode {
        match self {
            Self::NoSuchObject { .. } => LdapResultCode::NoSuchObject,
            Self::NoSuchAttribute(_) => LdapResultCode::NoSuchAttribute,
            Self::EntryAlreadyExists(_) => LdapResultCode::EntryAlreadyExists,
            Self::AttributeOrValueExists(_) => LdapResultCode::AttributeOrValueExists,
            Self::InvalidDnSyntax(_) => LdapResultCode::InvalidDnSyntax,
            Self::AliasProblem(_) => LdapResultCode::AliasProblem,
            Self::AliasDereferencingProblem => LdapResultCode::AliasDereferencingProblem,
            Self::Referral(_) => LdapResultCode::Referral,
            Self::SchemaViolation(se) => match se {
                SchemaError::InvalidAttribute(_) => LdapResultCode::UndefinedAttributeType,
                SchemaError::InvalidAttributeSyntax(_) => LdapResultCode::InvalidAttributeSyntax,
                SchemaError::SingleValueViolation(_) => LdapResultCode::ConstraintViolation,
                _ => LdapResultCode::ObjectClassViolation,
            },
            Self::InvalidAttributeSyntax(_) => LdapResultCode::InvalidAttributeSyntax,
            Self::NotAllowedOnNonLeaf => LdapResultCode::NotAllowedOnNonLeaf,
            Self::NotAllowedOnRdn => LdapResultCode::NotAllowedOnRdn,
            Self::NamingViolation(_) => LdapResultCode::NamingViolation,
            Self::InsufficientAccessRights => LdapResultCode::InsufficientAccessRights,
            Self::InvalidCredentials => LdapResultCode::InvalidCredentials,
            Self::UnwillingToPerform(_) | Self::UnsupportedOperation => {
                LdapResultCode::UnwillingToPerform
            }
            Self::TimeLimitExceeded => LdapResultCode::TimeLimitExceeded,
            Self::SizeLimitExceeded => LdapResultCode::SizeLimitExceeded,
            Self::InvalidAciItem(_) | Self::InvalidSubtreeSpecification(_) => {
                LdapResultCode::InvalidAttributeSyntax
            }
            Self::OperationsError(_)
            | Self::InvalidCursorPosition
            | Self::CursorClosed
            | Self::InvalidState
            | Self::BackendEngine
            | Self::CorruptedEntry(_)
            | Self::CorruptedIndex(_)
            | Self::ConsistencyError(_)
            | Self::LdifParseError(_)
            | Self::InvalidConfiguration(_)
            | Self::SerdeJsonError
            | Self::FsError => LdapResultCode::OperationsError,
        }
    }

    /// The deepest existing ancestor of the requested name, reported with NoSuchObject.
    pub fn matched_dn(&self) -> Option<&str> {
        match self {
            Self::NoSuchObject { matched } => matched.as_deref(),
            _ => None,
        }
    }

    pub fn no_such_object(matched: Option<String>) -> Self {
        Self::NoSuchObject { matched }
    }
}

impl From<SchemaError> for OperationError {
    fn from(se: SchemaError) -> Self {
        OperationError::SchemaViolation(se)
    }
}

#[test]
fn test_operationerror_as_nice_string() {
    assert_eq!(
        OperationError::CursorClosed.to_string(),
        "CursorClosed - The cursor has been closed.".to_string()
    );
    assert_eq!(
        OperationError::BackendEngine.to_string(),
        "BackendEngine".to_string()
    );
    assert_eq!(
        OperationError::CorruptedEntry(12345).to_string(),
        "CorruptedEntry(12345)".to_string()
    );
}

#[test]
fn test_operationerror_result_codes() {
    let e = OperationError::no_such_object(Some("ou=system".to_string()));
    assert_eq!(e.result_code(), LdapResultCode::NoSuchObject);
    assert_eq!(e.matched_dn(), Some("ou=system"));
    assert_eq!(u16::from(e.result_code()), 32);

    assert_eq!(
        OperationError::SchemaViolation(SchemaError::MissingMustAttribute(vec!["sn".into()]))
            .result_code(),
        LdapResultCode::ObjectClassViolation
    );
    assert_eq!(
        OperationError::SchemaViolation(SchemaError::SingleValueViolation("c".into()))
            .result_code(),
        LdapResultCode::ConstraintViolation
    );
    assert_eq!(
        u16::from(OperationError::NotAllowedOnNonLeaf.result_code()),
        66
    );
    assert_eq!(
        LdapResultCode::try_from(68u16).ok(),
        Some(LdapResultCode::EntryAlreadyExists)
    );
    // Kind comparison ignores the payload.
    assert_eq!(
        OperationError::EntryAlreadyExists("a".into()),
        OperationError::EntryAlreadyExists("b".into())
    );
}

#[test]
fn test_operationerror_serde() {
    let e = OperationError::no_such_object(Some("ou=system".to_string()));
    let s = serde_json::to_string(&e).expect("serialise");
    let d: OperationError = serde_json::from_str(&s).expect("deserialise");
    assert_eq!(d.matched_dn(), Some("ou=system"));
}
