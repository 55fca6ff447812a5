use proc_macro2::TokenStream;
use quote::quote;
use syn::{Attribute, FnArg, ImplItem, ImplItemFn, ItemImpl, LitStr, Meta, Type};

const SUBSCRIBE: &str = "subscribe";

#[derive(Default)]
struct SubscribeArgs {
    key: Option<LitStr>,
    concurrent: bool,
}

impl SubscribeArgs {
    fn parse(attr: &Attribute) -> syn::Result<Self> {
        let mut args = Self::default();
        if matches!(attr.meta, Meta::Path(_)) {
            return Ok(args);
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("key") {
                if args.key.is_some() {
                    return Err(meta.error("duplicate `key` argument"));
                }
                let key: LitStr = meta.value()?.parse()?;
                if key.value().trim().is_empty() {
                    return Err(syn::Error::new_spanned(&key, "routing key must not be empty"));
                }
                args.key = Some(key);
                Ok(())
            } else if meta.path.is_ident("concurrent") {
                args.concurrent = true;
                Ok(())
            } else {
                Err(meta.error("unsupported subscribe argument, expected `key = \"..\"` or `concurrent`"))
            }
        })?;
        Ok(args)
    }
}

pub fn expand_listener(args: TokenStream, mut input: ItemImpl) -> TokenStream {
    if !args.is_empty() {
        return syn::Error::new_spanned(args, "#[listener] takes no arguments").into_compile_error();
    }
    if let Some((_, path, _)) = &input.trait_ {
        return syn::Error::new_spanned(path, "#[listener] must be applied to an inherent impl block")
            .into_compile_error();
    }

    let mut handlers = Vec::new();
    let mut errors = Vec::new();
    for item in &mut input.items {
        let ImplItem::Fn(method) = item else { continue };
        let (tagged, rest): (Vec<_>, Vec<_>) =
            method.attrs.drain(..).partition(|a| a.path().is_ident(SUBSCRIBE));
        method.attrs = rest;

        match tagged.as_slice() {
            [] => {},
            [attr] => match SubscribeArgs::parse(attr).and_then(|args| declaration(&args, method)) {
                Ok(tokens) => handlers.push(tokens),
                Err(err) => errors.push(err.into_compile_error()),
            },
            [_, extra, ..] => errors.push(
                syn::Error::new_spanned(extra, "a method may carry a single #[subscribe]")
                    .into_compile_error(),
            ),
        }
    }

    let self_ty = &input.self_ty;
    let (impl_generics, _, where_clause) = input.generics.split_for_impl();

    quote! {
        #input

        #(#errors)*

        #[automatically_derived]
        impl #impl_generics ::notice_bus::Listener for #self_ty #where_clause {
            fn handlers() -> ::std::vec::Vec<::notice_bus::HandlerMethod<Self>> {
                ::std::vec![#(#handlers),*]
            }
        }
    }
}

fn declaration(args: &SubscribeArgs, method: &ImplItemFn) -> syn::Result<TokenStream> {
    let sig = &method.sig;
    let ident = &sig.ident;
    let name = ident.to_string();

    if sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            sig.asyncness,
            format!("subscriber method `{name}` must be synchronous"),
        ));
    }
    match sig.inputs.first() {
        Some(FnArg::Receiver(recv)) if recv.reference.is_some() && recv.mutability.is_none() => {},
        _ => {
            return Err(syn::Error::new_spanned(
                sig,
                format!("subscriber method `{name}` must take `&self`"),
            ));
        },
    }

    let params: Vec<_> = sig
        .inputs
        .iter()
        .skip(1)
        .filter_map(|arg| match arg {
            FnArg::Typed(pat) => Some(pat),
            FnArg::Receiver(_) => None,
        })
        .collect();
    let [param] = params.as_slice() else {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            format!(
                "method `{name}` has #[subscribe] but has {} parameters; subscriber methods must have exactly 1 parameter",
                params.len()
            ),
        ));
    };
    let Type::Reference(reference) = param.ty.as_ref() else {
        return Err(syn::Error::new_spanned(
            &param.ty,
            format!("the event parameter of `{name}` must be a shared reference, e.g. `&TaskEvent`"),
        ));
    };
    if reference.mutability.is_some() {
        return Err(syn::Error::new_spanned(
            reference,
            format!("the event parameter of `{name}` must not be mutable"),
        ));
    }

    let event_ty = &reference.elem;
    let key = args.key.as_ref().map(|key| quote!(.routing_key(#key)));
    let concurrent = args.concurrent.then(|| quote!(.concurrent()));

    Ok(quote! {
        ::notice_bus::HandlerMethod::new::<#event_ty, _>(
            #name,
            |listener: &Self, event: &#event_ty| listener.#ident(event),
        )
        #key
        #concurrent
    })
}
