use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr, parse_macro_input};

pub fn derive_component(input: TokenStream) -> TokenStream {
    // Parse the input tokens into a syntax tree
    let ast = parse_macro_input!(input as DeriveInput);

    // Get the struct name we are annotating
    let struct_name = &ast.ident;

    // Default to table storage; `#[component(storage = "sparse")]` opts into
    // the entity-indexed sparse-set store.
    let mut storage = quote! { ::tessera_engine::ecs::component::StorageKind::Table };
    for attr in &ast.attrs {
        if attr.path().is_ident("component") {
            let result = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("storage") {
                    let value: LitStr = meta.value()?.parse()?;
                    storage = match value.value().as_str() {
                        "table" => {
                            quote! { ::tessera_engine::ecs::component::StorageKind::Table }
                        }
                        "sparse" => {
                            quote! { ::tessera_engine::ecs::component::StorageKind::SparseSet }
                        }
                        other => {
                            return Err(meta.error(format!(
                                "unknown storage kind `{other}`, expected `table` or `sparse`"
                            )));
                        }
                    };
                    Ok(())
                } else {
                    Err(meta.error("unknown component attribute"))
                }
            });
            if let Err(error) = result {
                return error.to_compile_error().into();
            }
        }
    }

    // Use ::tessera_engine::ecs::Component which works both inside and outside the crate.
    // Inside the crate, this works because of `extern crate self as tessera_engine;` in lib.rs
    // Outside the crate, this naturally resolves to the tessera_engine dependency.
    TokenStream::from(quote! {
        impl ::tessera_engine::ecs::Component for #struct_name {
            const STORAGE: ::tessera_engine::ecs::component::StorageKind = #storage;
        }
    })
}
