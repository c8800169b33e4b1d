//! Shared types for the directory server. These are the error and result code
//! definitions consumed by the protocol layer, along with the well known attribute
//! names and DNs that the server bootstraps.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![forbid(unsafe_code)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

pub mod constants;
pub mod internal;

/// Attribute names and OIDs are short, so keep them inline where possible.
pub type AttrString = smartstring::alias::String;
