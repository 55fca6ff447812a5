use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Field, Fields, Index, Member};

/// Expands `#[derive(Event)]`.
///
/// Every `#[event(extends)]` field contributes its type as a direct supertype and
/// answers `upcast` requests for that type, then for the field's own ancestors.
pub fn expand_event(input: DeriveInput) -> TokenStream {
    try_expand(&input).unwrap_or_else(syn::Error::into_compile_error)
}

fn try_expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let parents = match &input.data {
        Data::Struct(data) => parent_fields(&data.fields)?,
        Data::Enum(_) | Data::Union(_) => Vec::new(),
    };

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    if parents.is_empty() {
        return Ok(quote! {
            #[automatically_derived]
            impl #impl_generics ::notice_bus::Event for #name #ty_generics #where_clause {}
        });
    }

    let types: Vec<_> = parents.iter().map(|(_, field)| &field.ty).collect();
    let members: Vec<_> = parents.iter().map(|(member, _)| member).collect();

    Ok(quote! {
        #[automatically_derived]
        impl #impl_generics ::notice_bus::Event for #name #ty_generics #where_clause {
            fn supertypes() -> ::std::vec::Vec<::notice_bus::EventType> {
                ::std::vec![#(::notice_bus::EventType::of::<#types>()),*]
            }

            fn upcast(&self, target: ::std::any::TypeId) -> ::std::option::Option<&dyn ::std::any::Any> {
                #(
                    if target == ::std::any::TypeId::of::<#types>() {
                        return ::std::option::Option::Some(&self.#members as &dyn ::std::any::Any);
                    }
                    if let ::std::option::Option::Some(found) =
                        ::notice_bus::Event::upcast(&self.#members, target)
                    {
                        return ::std::option::Option::Some(found);
                    }
                )*
                ::std::option::Option::None
            }
        }
    })
}

fn parent_fields(fields: &Fields) -> syn::Result<Vec<(Member, &Field)>> {
    let mut parents = Vec::new();
    for (index, field) in fields.iter().enumerate() {
        let mut extends = false;
        for attr in field.attrs.iter().filter(|a| a.path().is_ident("event")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("extends") {
                    extends = true;
                    Ok(())
                } else {
                    Err(meta.error("unsupported event attribute, expected `extends`"))
                }
            })?;
        }
        if extends {
            let member =
                field.ident.clone().map_or_else(|| Member::Unnamed(Index::from(index)), Member::Named);
            parents.push((member, field));
        }
    }
    Ok(parents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_plain_event_has_empty_impl() {
        let out = expand_event(parse_quote! {
            struct TaskEvent { task_id: String }
        })
        .to_string();

        assert!(out.contains("impl :: notice_bus :: Event for TaskEvent { }"));
    }

    #[test]
    fn test_extends_fields_become_supertypes() {
        let out = expand_event(parse_quote! {
            struct Deleted {
                #[event(extends)]
                audit: Audited,
                id: u64,
            }
        })
        .to_string();

        assert!(out.contains("EventType :: of :: < Audited > ()"));
        assert!(out.contains("& self . audit"));
        assert!(!out.contains("self . id"));
    }

    #[test]
    fn test_tuple_struct_parent() {
        let out = expand_event(parse_quote! {
            struct Wrapped(u8, #[event(extends)] Inner);
        })
        .to_string();

        assert!(out.contains("& self . 1"));
    }

    #[test]
    fn test_unknown_attribute_is_rejected() {
        let out = expand_event(parse_quote! {
            struct Deleted {
                #[event(parent)]
                audit: Audited,
            }
        })
        .to_string();

        assert!(out.contains("compile_error"));
    }
}
