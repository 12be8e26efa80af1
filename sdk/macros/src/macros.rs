// Procedural macros for brewcast module definition

extern crate proc_macro;
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Fields, ItemStruct, Lit, LitStr, Meta, NestedMeta};

/// Turn a struct into a brewcast module.
///
/// The struct must provide an inherent `async fn init(&self, context, config)`
/// and derive `Default`, which `register()` uses to construct it. Adding the
/// bare `before_shutdown` flag forwards the module's own
/// `async fn before_shutdown(&self)` as well.
///
/// ```ignore
/// #[module(
///     message_type(M),
///     name = "temperature",
///     description = "Temperature broadcaster",
///     before_shutdown
/// )]
/// #[derive(Default)]
/// pub struct TemperaturePublisher<M: From<Event> + MessageBounds>;
/// ```
#[proc_macro_attribute]
pub fn module(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut input = parse_macro_input!(item as ItemStruct);
    let struct_name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, type_generics, where_clause) = generics.split_for_impl();
    let has_generics = !generics.params.is_empty();

    // Parse the attributes
    let parsed_attrs = parse_macro_input!(attr as syn::AttributeArgs);
    let mut name = None;
    let mut description = None;
    let mut message_type = None;
    let mut before_shutdown = false;

    for meta in parsed_attrs {
        match meta {
            NestedMeta::Meta(Meta::NameValue(ref meta_name_value))
                if meta_name_value.path.is_ident("name") =>
            {
                if let Lit::Str(ref lit) = meta_name_value.lit {
                    name = Some(lit.clone());
                }
            }
            NestedMeta::Meta(Meta::NameValue(ref meta_name_value))
                if meta_name_value.path.is_ident("description") =>
            {
                if let Lit::Str(ref lit) = meta_name_value.lit {
                    description = Some(lit.clone());
                }
            }
            NestedMeta::Meta(Meta::List(ref meta_list))
                if meta_list.path.is_ident("message_type") =>
            {
                if let Some(NestedMeta::Meta(Meta::Path(ref path))) = meta_list.nested.first() {
                    message_type = Some(path.clone());
                }
            }
            NestedMeta::Meta(Meta::Path(ref path)) if path.is_ident("before_shutdown") => {
                before_shutdown = true;
            }
            _ => {}
        }
    }

    let name = match name {
        Some(n) => n,
        None => {
            return syn::Error::new_spanned(&struct_name, "Module attribute 'name' is required")
                .to_compile_error()
                .into();
        }
    };

    let description =
        description.unwrap_or_else(|| LitStr::new("No description provided", name.span()));

    let message_type = match message_type {
        Some(t) => t,
        None => {
            return syn::Error::new_spanned(
                &struct_name,
                "Module attribute 'message_type' is required",
            )
            .to_compile_error()
            .into();
        }
    };

    // Unit structs become named so the marker (or nothing) can live in them
    if let Fields::Unit = input.fields {
        input.fields = Fields::Named(syn::FieldsNamed {
            brace_token: Default::default(),
            named: syn::punctuated::Punctuated::new(),
        });
    }

    // Generic modules carry a marker for the message type
    if has_generics {
        if let Fields::Named(ref mut fields_named) = input.fields {
            fields_named.named.push(syn::Field {
                attrs: vec![],
                vis: syn::Visibility::Inherited,
                ident: Some(syn::Ident::new("_marker", struct_name.span())),
                colon_token: Some(Default::default()),
                ty: syn::parse_quote!(std::marker::PhantomData #type_generics),
            });
        }
    }

    let before_shutdown_impl = if before_shutdown {
        quote! {
            async fn before_shutdown(&self) -> anyhow::Result<()> {
                #struct_name::before_shutdown(self).await
            }
        }
    } else {
        quote! {}
    };

    let expanded = quote! {
        // Struct definition - possibly modified
        #input

        #[brewcast_sdk::async_trait]
        impl #impl_generics brewcast_sdk::Module<#message_type> for #struct_name #type_generics #where_clause {

            // Implement init, calling down to struct's own
            async fn init(&self,
                          context: std::sync::Arc<brewcast_sdk::Context<#message_type>>,
                          config: std::sync::Arc<config::Config>)
                    -> anyhow::Result<()> {
                #struct_name::init(self, context, config).await
            }

            #before_shutdown_impl

            fn get_name(&self) -> &'static str {
                #name
            }

            fn get_description(&self) -> &'static str {
                #description
            }
        }

        impl #impl_generics #struct_name #type_generics #where_clause {

            /// Register at startup (call this in main())
            pub fn register(registry: &mut dyn brewcast_sdk::ModuleRegistry<#message_type>) {
                let module: Self = Default::default();
                registry.register(std::sync::Arc::new(module));
            }
        }

        // Basic Debug for tracing
        impl #impl_generics std::fmt::Debug for #struct_name #type_generics #where_clause {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(#name)
                    .finish()
            }
        }
    };

    TokenStream::from(expanded)
}
