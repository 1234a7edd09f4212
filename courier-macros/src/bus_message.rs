use crate::utils::{StrArgs, lit_str};
use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{ParseStream, Parser};
use syn::spanned::Spanned;
use syn::{Item, parse_macro_input};

const KEYS: &[&str] = &["group", "message_type", "action", "routing_key"];

pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match (|input: ParseStream| StrArgs::parse(input, KEYS)).parse(attr) {
        Ok(args) => args,
        Err(e) => return e.to_compile_error().into(),
    };
    let input = parse_macro_input!(item as Item);

    let (ident, generics) = match &input {
        Item::Struct(s) => (&s.ident, &s.generics),
        Item::Enum(e) => (&e.ident, &e.generics),
        other => {
            return syn::Error::new(other.span(), "#[bus_message] only on struct or enum")
                .to_compile_error()
                .into();
        }
    };

    let segments = (|| -> syn::Result<_> {
        Ok((
            args.segment("group")?,
            args.segment("message_type")?,
            args.segment("action")?,
        ))
    })();
    let (group, message_type, action) = match segments {
        Ok(s) => s,
        Err(e) => return e.to_compile_error().into(),
    };

    let group = group.unwrap_or_else(|| lit_str("FreeFormatMessage", ident.span()));
    let message_type = message_type.unwrap_or_else(|| lit_str(&ident.to_string(), ident.span()));

    let action_fn = action.map(|lit| {
        quote! {
            fn message_action(&self) -> ::std::option::Option<&str> {
                ::std::option::Option::Some(#lit)
            }
        }
    });
    let routing_key_fn = args.get("routing_key").map(|lit| {
        quote! {
            fn self_routing_key(&self) -> ::std::option::Option<::courier_domain::envelope::RoutingKey> {
                ::std::option::Option::Some(::courier_domain::envelope::RoutingKey::new(#lit))
            }
        }
    });

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let out = quote! {
        #input

        impl #impl_generics ::courier_domain::envelope::BusMessagePayload for #ident #ty_generics #where_clause {
            const MESSAGE_GROUP: &'static str = #group;
            const MESSAGE_TYPE: &'static str = #message_type;
            #action_fn
            #routing_key_fn
        }
    };

    TokenStream::from(out)
}
