//! The dirsrvd server library. This implements the internal components of an embeddable
//! LDAP directory: the schema aware entry model, the indexed partition store and its
//! cursors, the interceptor chain every operation passes through, access control, and
//! the change and journal recorders.

#![recursion_limit = "512"]
#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate lazy_static;

// This has to be before 'be' so the import order works
#[macro_use]
pub mod macros;

pub mod be;
pub mod config;
pub mod constants;
pub mod csn;
pub mod dn;
pub mod entry;
pub mod event;
pub mod filter;
pub mod interceptors;
pub mod ldif;
pub mod modify;
pub mod schema;
pub mod server;
pub mod subtree;
pub mod testkit;
pub mod value;
pub mod valueset;

/// A prelude of imports that should be imported by all other dirsrvd modules to
/// help make imports cleaner.
pub mod prelude {
    pub use dirsrv_proto::constants::*;
    pub use dirsrv_proto::internal::{
        ConsistencyError, LdapResultCode, OperationError, SchemaError,
    };
    pub use dirsrv_proto::AttrString;
    pub use sketching::{
        admin_debug, admin_error, admin_info, admin_warn, filter_error, filter_info, filter_trace,
        filter_warn, journal_error, journal_info, perf_trace, request_error, request_info,
        request_trace, request_warn, security_access, security_critical, security_debug,
        security_error, security_info, tagged_event, EventTag,
    };
    pub use std::sync::Arc;
    pub use std::time::Duration;

    pub use crate::constants::*;
    pub use crate::dn::{Ava, Dn, Rdn};
    pub use crate::entry::{
        AttributeSelection, Entry, EntryCommitted, EntryInit, EntryNew, EntrySealedCommitted,
    };
    pub use crate::event::{
        AddContext, BindContext, Bypass, CompareContext, DeleteContext, ListContext,
        LookupContext, ModifyContext, MoveAndRenameContext, MoveContext, OperationCommon,
        RenameContext, SearchContext, UnbindContext,
    };
    pub use crate::filter::{
        f_and, f_approx, f_eq, f_ge, f_le, f_not, f_or, f_pres, f_sub, Filter, FilterInvalid,
        FilterValid, FC,
    };
    pub use crate::modify::{
        m_add, m_purge, m_remove, m_replace, ModOrigin, ModifyInvalid, ModifyList, ModifyOp,
        ModifyValid,
    };
    pub use crate::schema::{Schema, SchemaTransaction};
    pub use crate::server::identity::{AuthenticationLevel, IdentType, Identity};
    pub use crate::server::{DirectoryService, Session};
    pub use crate::value::{RawValue, Value};
    pub use crate::valueset::ValueSet;

    #[cfg(test)]
    pub use dirsrvd_lib_macros::*;
}
