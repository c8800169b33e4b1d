use proc_macro::TokenStream;
use proc_macro2::{Ident, Span};
use quote::{quote, quote_spanned, ToTokens};
use syn::{parse::Parser, punctuated::Punctuated, spanned::Spanned, ExprAssign, Token};

fn token_stream_with_error(mut tokens: TokenStream, error: syn::Error) -> TokenStream {
    tokens.extend(TokenStream::from(error.into_compile_error()));
    tokens
}

const ALLOWED_ATTRIBUTES: &[&str] = &[
    "access_control_enabled",
    "allow_anonymous_access",
    "changelog_enabled",
    "journal_enabled",
    "max_size_limit",
];

fn parse_attributes(
    args: &TokenStream,
    input: &syn::ItemFn,
) -> Result<proc_macro2::TokenStream, syn::Error> {
    let args: Punctuated<ExprAssign, syn::token::Comma> =
        Punctuated::<ExprAssign, Token![,]>::parse_terminated.parse(args.clone())?;

    let mut field_modifications = quote! {};

    for p in args.pairs() {
        let field_name = p.value().left.to_token_stream();
        let name = field_name.to_string();
        if !ALLOWED_ATTRIBUTES.contains(&name.as_str()) {
            let msg = "Invalid test config attribute. The following are allowed";
            return Err(syn::Error::new_spanned(
                input.sig.fn_token,
                format!("{}: {}", msg, ALLOWED_ATTRIBUTES.join(", ")),
            ));
        }
        let field_value = p.value().right.to_token_stream();
        field_modifications.extend(quote! {
            #field_name: #field_value,
        });
    }

    Ok(quote!(crate::testkit::TestConfiguration {
        #field_modifications
        ..crate::testkit::TestConfiguration::default()
    }))
}

pub(crate) fn ds_test(args: &TokenStream, item: TokenStream, with_verify: bool) -> TokenStream {
    let input: syn::ItemFn = match syn::parse(item.clone()) {
        Ok(it) => it,
        Err(e) => return token_stream_with_error(item, e),
    };

    if let Some(attr) = input.attrs.iter().find(|attr| attr.path().is_ident("test")) {
        let msg = "second test attribute is supplied";
        return token_stream_with_error(item, syn::Error::new_spanned(attr, msg));
    };

    if input.sig.asyncness.is_some() {
        let msg = "the directory core is synchronous, remove the `async` keyword";
        return token_stream_with_error(item, syn::Error::new_spanned(input.sig.fn_token, msg));
    }

    // rustc points type mismatches at the last statement, so anchor the driver there.
    let last_stmt_start_span = input
        .block
        .stmts
        .last()
        .map(ToTokens::into_token_stream)
        .unwrap_or_default()
        .into_iter()
        .next()
        .map_or_else(Span::call_site, |t| t.span());

    let default_config_struct = match parse_attributes(args, &input) {
        Ok(dc) => dc,
        Err(e) => return token_stream_with_error(args.clone(), e),
    };

    let setup = quote_spanned! {last_stmt_start_span=>
        crate::testkit::setup_test(test_config)
    };

    let verify = if with_verify {
        quote! {
            let verifications = test_server.verify();
            trace!("Verification result: {:?}", verifications);
            assert!(verifications.is_empty());
        }
    } else {
        quote! {}
    };

    let header = quote! {
        #[::core::prelude::v1::test]
    };

    let test_fn = &input.sig.ident;
    let test_driver = Ident::new(&format!("ds_{}", test_fn), input.sig.span());

    let result = quote! {
        #input

        #header
        fn #test_driver() {
            sketching::test_init();
            let test_config = #default_config_struct;

            let test_server = #setup;

            #test_fn(&test_server);

            #verify
            test_server.shutdown();
        }
    };

    result.into()
}
