use crate::utils::{StrArgs, apply_derives, ensure_field, lit_str};
use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{ParseStream, Parser};
use syn::spanned::Spanned;
use syn::{Item, parse_macro_input};

const KEYS: &[&str] = &["event_type", "name", "action"];

pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match (|input: ParseStream| StrArgs::parse(input, KEYS)).parse(attr) {
        Ok(args) => args,
        Err(e) => return e.to_compile_error().into(),
    };
    let mut input = parse_macro_input!(item as Item);

    let st = match &mut input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(other.span(), "#[cqrs_event] only on struct")
                .to_compile_error()
                .into();
        }
    };

    let segments = (|| -> syn::Result<_> {
        Ok((
            args.segment("event_type")?,
            args.segment("name")?,
            args.segment("action")?,
        ))
    })();
    let (event_type, name, action) = match segments {
        Ok(s) => s,
        Err(e) => return e.to_compile_error().into(),
    };
    let Some(event_type) = event_type else {
        return syn::Error::new(
            st.ident.span(),
            "#[cqrs_event] requires event_type = \"...\"",
        )
        .to_compile_error()
        .into();
    };

    // 仅支持具名字段
    let fields_named = match &mut st.fields {
        syn::Fields::Named(f) => f,
        _ => {
            return syn::Error::new(st.span(), "only supports named-field struct")
                .to_compile_error()
                .into();
        }
    };
    ensure_field(
        fields_named,
        "metadata",
        syn::parse_quote! {
            #[serde(default)]
            metadata: ::courier_application::cqrs::CqrsEventMetadata
        },
    );

    apply_derives(
        &mut st.attrs,
        vec![
            syn::parse_quote!(serde::Serialize),
            syn::parse_quote!(serde::Deserialize),
        ],
    );

    let ident = &st.ident;
    let name = name.unwrap_or_else(|| lit_str(&ident.to_string(), ident.span()));
    let action_fn = action.map(|lit| {
        quote! {
            fn event_action(&self) -> ::std::option::Option<&str> {
                ::std::option::Option::Some(#lit)
            }
        }
    });
    let (impl_generics, ty_generics, where_clause) = st.generics.split_for_impl();

    let out = quote! {
        #st

        impl #impl_generics ::courier_application::cqrs::CqrsEvent for #ident #ty_generics #where_clause {
            const EVENT_TYPE: &'static str = #event_type;
            const EVENT_NAME: &'static str = #name;
            #action_fn

            fn metadata(&self) -> &::courier_application::cqrs::CqrsEventMetadata {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ::courier_application::cqrs::CqrsEventMetadata {
                &mut self.metadata
            }
        }
    };

    TokenStream::from(out)
}
