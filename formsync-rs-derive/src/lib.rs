use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Field, Fields};

/// Derive macro for the `Entity` trait.
///
/// The id is read from the field marked `#[entity(id)]`, or from a field
/// named `id` when none is marked. The id field must implement `AsRef<str>`.
///
/// ```ignore
/// #[derive(Clone, Debug, Serialize, Deserialize, Entity)]
/// struct Agent {
///     #[entity(id)]
///     agent_id: String,
///     name: String,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return syn::Error::new_spanned(&input, "Entity can only be derived for structs with named fields")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(&input, "Entity can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let mut marked = Vec::new();
    for field in fields {
        match is_marked_id(field) {
            Ok(true) => marked.push(field),
            Ok(false) => {}
            Err(e) => return e.to_compile_error().into(),
        }
    }

    let id_field = match marked.as_slice() {
        [field] => *field,
        [] => match fields.iter().find(|f| f.ident.as_ref().is_some_and(|i| i == "id")) {
            Some(field) => field,
            None => {
                return syn::Error::new_spanned(&input, "Entity needs an `id` field or a field marked #[entity(id)]")
                    .to_compile_error()
                    .into();
            }
        },
        [_, second, ..] => {
            return syn::Error::new_spanned(second, "Only one field may be marked #[entity(id)]")
                .to_compile_error()
                .into();
        }
    };
    let id_ident = &id_field.ident;

    let expanded = quote! {
        impl #impl_generics ::formsync_rs::Entity for #name #ty_generics #where_clause {
            fn id(&self) -> &str {
                ::std::convert::AsRef::<str>::as_ref(&self.#id_ident)
            }
        }
    };

    TokenStream::from(expanded)
}

fn is_marked_id(field: &Field) -> syn::Result<bool> {
    let mut marked = false;
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                marked = true;
                Ok(())
            } else {
                Err(meta.error("unsupported entity attribute"))
            }
        })?;
    }
    Ok(marked)
}
