use fxhash::FxHashSet;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, GenericArgument, Ident, PathArguments, Type, Variant};

struct ErrorVariant<'a> {
    ident: &'a Ident,
    source: Option<(&'a Ident, &'a Type)>,
    has_context: bool,
    cfg_attrs: Vec<&'a Attribute>,
}

impl<'a> ErrorVariant<'a> {
    fn parse(variant: &'a Variant) -> syn::Result<Self> {
        let Fields::Named(fields) = &variant.fields else {
            return Err(syn::Error::new_spanned(
                variant,
                "notice_error requires named fields so source/context can be wired",
            ));
        };

        let mut has_context = false;
        let mut source = None;
        for field in &fields.named {
            let Some(ident) = &field.ident else { continue };
            if ident == "context" {
                if !is_context_type(&field.ty) {
                    return Err(syn::Error::new_spanned(
                        &field.ty,
                        "context field must be Option<Cow<'static, str>>",
                    ));
                }
                has_context = true;
            } else if ident == "source"
                || field.attrs.iter().any(|a| a.path().is_ident("source") || a.path().is_ident("from"))
            {
                source = Some((ident, &field.ty));
            }
        }

        if source.is_some() && !has_context {
            return Err(syn::Error::new_spanned(
                &variant.ident,
                "notice_error requires `context: Option<Cow<'static, str>>` next to a source field",
            ));
        }

        Ok(Self {
            ident: &variant.ident,
            source,
            has_context,
            cfg_attrs: variant.attrs.iter().filter(|a| a.path().is_ident("cfg")).collect(),
        })
    }

    fn conversion(&self, name: &Ident, ext: &Ident) -> Option<TokenStream> {
        let (field, ty) = self.source?;
        let variant = self.ident;
        let cfg = &self.cfg_attrs;

        Some(quote! {
            #(#cfg)*
            #[automatically_derived]
            impl From<#ty> for #name {
                #[inline]
                fn from(#field: #ty) -> Self {
                    Self::#variant { #field, context: None }
                }
            }

            #(#cfg)*
            impl<T> #ext<T> for ::std::result::Result<T, #ty> {
                #[inline]
                fn context(
                    self,
                    context: impl Into<::std::borrow::Cow<'static, str>>,
                ) -> ::std::result::Result<T, #name> {
                    self.map_err(|#field| #name::#variant { #field, context: Some(context.into()) })
                }
            }
        })
    }
}

pub fn expand_error(input: DeriveInput) -> TokenStream {
    try_expand(&input).unwrap_or_else(syn::Error::into_compile_error)
}

fn try_expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(&input.ident, "notice_error can only be applied to enums"));
    };
    let variants = data.variants.iter().map(ErrorVariant::parse).collect::<syn::Result<Vec<_>>>()?;

    let name = &input.ident;
    let ext = format_ident!("{name}Ext");

    let present = derived_traits(&input.attrs);
    let mut derives = Vec::new();
    if !present.contains("Debug") {
        derives.push(quote!(Debug));
    }
    if !present.contains("Error") {
        derives.push(quote!(::thiserror::Error));
    }
    let derive_attr = (!derives.is_empty()).then(|| quote!(#[derive(#(#derives),*)]));

    let context_arms = variants.iter().filter(|v| v.has_context).map(|v| {
        let ident = v.ident;
        let cfg = &v.cfg_attrs;
        quote!(#(#cfg)* #name::#ident { context: slot, .. } => *slot = Some(context.into()),)
    });
    let conversions = variants.iter().filter_map(|v| v.conversion(name, &ext));

    Ok(quote! {
        #[allow(non_shorthand_field_patterns)]
        #derive_attr
        #input

        /// Attaches a human readable context to an error result.
        pub trait #ext<T> {
            /// Wraps the error with `context`.
            ///
            /// # Errors
            /// Returns the original error enriched with the given context.
            fn context(
                self,
                context: impl Into<::std::borrow::Cow<'static, str>>,
            ) -> ::std::result::Result<T, #name>;
        }

        #[automatically_derived]
        impl<T> #ext<T> for ::std::result::Result<T, #name> {
            #[inline]
            fn context(self, context: impl Into<::std::borrow::Cow<'static, str>>) -> Self {
                self.map_err(|mut err| {
                    match &mut err {
                        #(#context_arms)*
                        #[allow(unreachable_patterns)]
                        _ => {}
                    }
                    err
                })
            }
        }

        #(#conversions)*

        #[allow(dead_code)]
        fn format_context(
            context: &Option<::std::borrow::Cow<'static, str>>,
        ) -> ::std::borrow::Cow<'static, str> {
            context.as_ref().map_or(::std::borrow::Cow::Borrowed(""), |c| {
                ::std::borrow::Cow::Owned(format!(" ({c})"))
            })
        }
    })
}

fn derived_traits(attrs: &[Attribute]) -> FxHashSet<String> {
    let mut traits = FxHashSet::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("derive")) {
        let _ = attr.parse_nested_meta(|meta| {
            if let Some(last) = meta.path.segments.last() {
                traits.insert(last.ident.to_string());
            }
            Ok(())
        });
    }
    traits
}

/// Matches `Option<Cow<'static, str>>`, with or without path prefixes.
fn is_context_type(ty: &Type) -> bool {
    let Some(inner) = single_generic(ty, "Option") else {
        return false;
    };
    let Type::Path(path) = inner else {
        return false;
    };
    let Some(cow) = path.path.segments.last() else {
        return false;
    };
    if cow.ident != "Cow" {
        return false;
    }
    let PathArguments::AngleBracketed(args) = &cow.arguments else {
        return false;
    };
    let mut args = args.args.iter();
    matches!(args.next(), Some(GenericArgument::Lifetime(lt)) if lt.ident == "static")
        && matches!(
            args.next(),
            Some(GenericArgument::Type(Type::Path(s)))
                if s.path.segments.last().is_some_and(|seg| seg.ident == "str")
        )
}

fn single_generic<'a>(ty: &'a Type, outer: &str) -> Option<&'a Type> {
    let Type::Path(path) = ty else { return None };
    let segment = path.path.segments.last()?;
    if segment.ident != outer {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else { return None };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_generates_ext_trait_and_source_conversion() {
        let input: DeriveInput = parse_quote! {
            pub enum BusError {
                #[error("io{}: {source}", format_context(.context))]
                Io { source: std::io::Error, context: Option<Cow<'static, str>> },
                #[error("internal{}: {message}", format_context(.context))]
                Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
            }
        };

        let out = expand_error(input).to_string();
        assert!(out.contains("trait BusErrorExt"));
        assert!(out.contains("impl From < std :: io :: Error > for BusError"));
        assert_eq!(out.matches("impl From <").count(), 1);
        assert!(!out.contains("compile_error"));
    }

    #[test]
    fn test_rejects_tuple_variants() {
        let input: DeriveInput = parse_quote! {
            pub enum BusError {
                Broken(String),
            }
        };

        let out = expand_error(input).to_string();
        assert!(out.contains("compile_error"));
        assert!(out.contains("named fields"));
    }

    #[test]
    fn test_rejects_source_without_context() {
        let input: DeriveInput = parse_quote! {
            pub enum BusError {
                Io { source: std::io::Error },
            }
        };

        let out = expand_error(input).to_string();
        assert!(out.contains("compile_error"));
    }

    #[test]
    fn test_rejects_bad_context_type() {
        let input: DeriveInput = parse_quote! {
            pub enum BusError {
                Broken { context: Option<String> },
            }
        };

        assert!(expand_error(input).to_string().contains("Option<Cow<'static, str>>"));
    }

    #[test]
    fn test_keeps_existing_derives() {
        let input: DeriveInput = parse_quote! {
            #[derive(Debug)]
            pub enum BusError {
                Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
            }
        };

        let out = expand_error(input).to_string();
        assert_eq!(out.matches("Debug").count(), 1);
    }
}
