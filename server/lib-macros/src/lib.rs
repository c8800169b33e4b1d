#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

mod entry;

#[allow(unused_extern_crates)]
extern crate proc_macro;

use proc_macro::TokenStream;

/// Wrap a test function taking `&DirectoryService` so that it runs against a freshly
/// bootstrapped service, and verifies the store indexes once the body returns.
///
/// Fields of `testkit::TestConfiguration` may be overridden, for example
/// `#[ds_test(access_control_enabled = true)]`.
#[proc_macro_attribute]
pub fn ds_test(args: TokenStream, item: TokenStream) -> TokenStream {
    entry::ds_test(&args, item, true)
}

/// As `ds_test` but skips the post-test verification. Used by tests that deliberately
/// leave the store in an unusual state.
#[proc_macro_attribute]
pub fn ds_test_no_verify(args: TokenStream, item: TokenStream) -> TokenStream {
    entry::ds_test(&args, item, false)
}
