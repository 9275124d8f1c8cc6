use proc_macro::TokenStream;
use quote::quote_spanned;
use syn::{ItemFn, LitInt, parse_macro_input, spanned::Spanned};

/// Runs the body in a fresh thread named after the test, and asserts its exit
/// code.
#[proc_macro_attribute]
pub fn assert_exit_code(attr: TokenStream, item: TokenStream) -> TokenStream {
    let code = parse_macro_input!(attr as LitInt);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            fn _f() {}
            fn _get_name<T>(_: T) -> &'static str {
                let n = core::any::type_name::<T>();
                &n[..n.len() - 4]
            }
            assert_eq!(
                keos::thread::ThreadBuilder::new(_get_name(_f))
                    .spawn(move || { #block })
                    .expect("Failed to spawn the test thread.")
                    .join(),
            #code);
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}

/// Runs the body in a fresh thread at the given priority, and asserts that it
/// exits with 0.
#[proc_macro_attribute]
pub fn priority(attr: TokenStream, item: TokenStream) -> TokenStream {
    let priority = parse_macro_input!(attr as LitInt);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            fn _f() {}
            fn _get_name<T>(_: T) -> &'static str {
                let n = core::any::type_name::<T>();
                &n[..n.len() - 4]
            }
            assert_eq!(
                keos::thread::ThreadBuilder::new(_get_name(_f))
                    .priority(#priority)
                    .spawn(move || { #block })
                    .expect("Failed to spawn the test thread.")
                    .join(),
            0);
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}

/// Asserts that every thread created by the body is reclaimed, and that the
/// current thread holds no donation afterwards.
#[proc_macro_attribute]
pub fn validate_threads(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            let _live_threads = keos::thread::live_threads();
            let _return_val = (move || { #block })();
            grading::wait_for_reclamation(_live_threads);
            grading::assert_no_donation();
            _return_val
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}
