use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{Ident, ItemFn};

/// Proc macro to denote a Transaction
///
/// Calls are timed and counted into three metrics named after the function:
/// `<name>_count`, `<name>_failed` (an `Err` return counts as failed) and `<name>_duration`.
///
/// NOTE: Currently this macro only works on functions with a `Result<T, E>` return value.
///
/// # Example
/// ```ignore
/// use surge::prelude::*;
///
/// #[transaction]
/// async fn login(user: &str) -> Result<(), MyError> {
///     ...
/// }
/// ```
#[proc_macro_attribute]
pub fn transaction(attr: TokenStream, item: TokenStream) -> TokenStream {
    transaction_internal(attr, item).into()
}

fn transaction_internal(_attr: TokenStream, item: TokenStream) -> TokenStream2 {
    let input = match syn::parse::<ItemFn>(item) {
        Ok(input) => input,
        Err(err) => return err.to_compile_error(),
    };

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;
    let stmts = &block.stmts;
    let name = &sig.ident;

    quote! {
        #(#attrs)* #vis #sig {
            ::surge::transaction::transaction_hook(
                ::surge::core::generate_labels!(#name),
                async move {
                    #(#stmts)*
                },
            ).await
        }
    }
}

/// Proc macro to denote a Scenario
///
/// NOTE: Currently this macro only works on async functions which take no arguments and have no
/// return value. The body is the work one VU performs per iteration.
///
/// See the `ConfigurableScenario` trait for the methods this macro provides on functions.
///
/// # Example
/// ```ignore
/// use surge::prelude::*;
///
/// #[scenario]
/// async fn my_scenario() {
///     let res = surge::http::get("http://localhost:3000/users").await;
///     check("status is 200", res.status == 200);
/// }
/// ```
#[proc_macro_attribute]
pub fn scenario(attr: TokenStream, item: TokenStream) -> TokenStream {
    scenario_internal(attr, item).into()
}

fn scenario_internal(_attr: TokenStream, item: TokenStream) -> TokenStream2 {
    let input = match syn::parse::<ItemFn>(item) {
        Ok(input) => input,
        Err(err) => return err.to_compile_error(),
    };

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(&input.sig, "#[scenario] requires an async fn")
            .to_compile_error();
    }
    if !input.sig.inputs.is_empty() {
        return syn::Error::new_spanned(&input.sig.inputs, "#[scenario] fns take no arguments")
            .to_compile_error();
    }

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;
    let stmts = &block.stmts;

    let new_name = Ident::new(&format!("__surge_{}", sig.ident), Span::call_site());
    let mut new_sig = sig.clone();
    new_sig.ident = new_name.clone();

    let mut scen_sig = sig.clone();
    let scen_name = sig.ident.clone();
    scen_sig.asyncness = None;
    scen_sig.output = syn::parse2(quote! {
        -> impl ::surge::scenario::ConfigurableScenario<::surge::scenario::ScenarioResult>
    })
    .expect("Scenario signature is invalid");

    quote! {
        #(#attrs)* #vis #scen_sig {
            ::surge::scenario::Scenario::new(stringify!(#scen_name), #new_name)
        }

        #(#attrs)* #vis #new_sig {
            #(#stmts)*
        }
    }
}
