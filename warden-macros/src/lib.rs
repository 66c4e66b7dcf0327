// These lints are triggered by darling's generated code for
// `#[darling(default)]`.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::needless_continue)]

use darling::{FromDeriveInput, util::PathList};
use heck::{ToKebabCase, ToUpperCamelCase};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{DeriveInput, Ident, Path, parse_macro_input};

#[allow(clippy::doc_markdown, reason = "false positive")]
/// Build a PascalCase enum variant name from a type path.
fn path_to_pascal_ident(path: &Path) -> Ident {
    let combined = path
        .segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("_");
    let pascal = combined.to_upper_camel_case();
    let span = path
        .segments
        .last()
        .map_or_else(proc_macro2::Span::call_site, |segment| segment.ident.span());
    Ident::new(&pascal, span)
}

/// Returns the override or the default kebab-case name from the ident.
fn default_kind(ident: &Ident, kind: Option<String>) -> String {
    kind.unwrap_or_else(|| ident.to_string().to_kebab_case())
}

/// Configuration for the `#[event(...)]` attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(event), supports(struct_any))]
struct EventArgs {
    ident: Ident,
    #[darling(default)]
    kind: Option<String>,
}

/// Configuration for the `#[write_model(...)]` attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(write_model), supports(struct_named))]
struct WriteModelArgs {
    ident: Ident,
    vis: syn::Visibility,
    events: PathList,
    #[darling(default)]
    aggregate: Option<String>,
    #[darling(default)]
    event_enum: Option<String>,
    #[darling(default)]
    derives: Option<PathList>,
    /// Field holding the lifecycle state; must implement `State`.
    #[darling(default)]
    state: Option<String>,
}

/// Captures the event type path and its generated enum variant identifier.
struct EventSpec<'a> {
    path: &'a Path,
    variant: Ident,
}

impl<'a> EventSpec<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            variant: path_to_pascal_ident(path),
        }
    }
}

/// Parse derive input with darling and render errors as tokens.
fn parse_or_error<T, F>(input: &DeriveInput, f: F) -> TokenStream2
where
    T: FromDeriveInput,
    F: FnOnce(T) -> TokenStream2,
{
    match T::from_derive_input(input) {
        Ok(args) => f(args),
        Err(err) => err.write_errors(),
    }
}

/// Derives `DomainEvent` for an event payload struct.
///
/// # Attributes
///
/// - `kind = "name"` - Stored event type (default: kebab-case struct name)
///
/// # Example
///
/// ```ignore
/// #[derive(Serialize, Deserialize, DomainEvent)]
/// #[event(kind = "idp.oauth.added")]
/// pub struct OAuthIdpAdded {
///     pub id: String,
/// }
/// ```
#[proc_macro_derive(DomainEvent, attributes(event))]
pub fn derive_domain_event(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_domain_event_impl(&input).into()
}

fn derive_domain_event_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<EventArgs, _>(input, |args| {
        let name = &args.ident;
        let kind = default_kind(name, args.kind);
        let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
        quote! {
            impl #impl_generics ::warden::event::DomainEvent for #name #ty_generics #where_clause {
                const KIND: &'static str = #kind;
            }
        }
    })
}

/// Derives `WriteModel` for a struct.
///
/// This macro generates:
/// - An event enum containing every listed event type
/// - `EventKind` and `EventSet` implementations for the enum; unknown stored
///   event types decode to `None`
/// - `From<E>` implementations for each event type
/// - `WriteModel` implementation that dispatches to `Apply<E>` and reads
///   existence from the state field
///
/// # Attributes
///
/// ## Required
/// - `events(Type1, Type2, ...)` - Event types the model reacts to
///
/// ## Optional
/// - `aggregate = "name"` - Aggregate type of the stream (default: kebab-case
///   struct name)
/// - `event_enum = "Name"` - Override generated event enum name (default:
///   `{Struct}Event`)
/// - `derives(Trait1, Trait2, ...)` - Additional derives for the generated
///   event enum. Always includes `Clone`.
/// - `state = "field"` - Field implementing `State` (default: `state`)
///
/// # Example
///
/// ```ignore
/// #[derive(Default, WriteModel)]
/// #[write_model(aggregate = "idp", events(GoogleIdpAdded, GoogleIdpChanged, IdpRemoved))]
/// pub struct GoogleIdpWriteModel {
///     state: IdpState,
///     client_id: String,
/// }
/// ```
#[proc_macro_derive(WriteModel, attributes(write_model))]
pub fn derive_write_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_write_model_impl(&input).into()
}

fn derive_write_model_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<WriteModelArgs, _>(input, |args| generate_write_model_impl(args, input))
}

/// Generate the write model derive implementation tokens.
fn generate_write_model_impl(args: WriteModelArgs, input: &DeriveInput) -> TokenStream2 {
    let event_specs: Vec<EventSpec<'_>> = args.events.iter().map(EventSpec::new).collect();

    if event_specs.is_empty() {
        return darling::Error::custom("events(...) must contain at least one event type")
            .with_span(&input.ident)
            .write_errors();
    }

    let struct_name = &args.ident;
    let struct_vis = &args.vis;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let aggregate = default_kind(struct_name, args.aggregate);
    let state_field = Ident::new(
        args.state.as_deref().unwrap_or("state"),
        proc_macro2::Span::call_site(),
    );

    let event_enum_name = args.event_enum.map_or_else(
        || Ident::new(&format!("{struct_name}Event"), struct_name.span()),
        |name| Ident::new(&name, struct_name.span()),
    );

    let event_types: Vec<&Path> = event_specs.iter().map(|spec| spec.path).collect();
    let variant_names: Vec<&Ident> = event_specs.iter().map(|spec| &spec.variant).collect();

    let user_derives = args.derives.unwrap_or_default();
    let derives = quote! { #[derive(Clone, #(#user_derives),*)] };

    quote! {
        #[doc = concat!("Events replayed by [`", stringify!(#struct_name), "`].")]
        #derives
        #struct_vis enum #event_enum_name {
            #(
                #[doc = concat!("[`", stringify!(#event_types), "`]")]
                #variant_names(#event_types)
            ),*
        }

        impl ::warden::event::EventKind for #event_enum_name {
            fn kind(&self) -> &'static str {
                match self {
                    #(Self::#variant_names(_) => <#event_types as ::warden::event::DomainEvent>::KIND),*
                }
            }
        }

        impl ::warden::event::EventSet for #event_enum_name {
            const EVENT_TYPES: &'static [&'static str] =
                &[#(<#event_types as ::warden::event::DomainEvent>::KIND),*];

            fn decode(
                event: &::warden::event::Event,
            ) -> ::core::result::Result<::core::option::Option<Self>, ::warden::event::EventDecodeError> {
                #(
                    if event.event_type == <#event_types as ::warden::event::DomainEvent>::KIND {
                        return event
                            .decode::<#event_types>()
                            .map(|e| ::core::option::Option::Some(Self::#variant_names(e)));
                    }
                )*
                ::core::result::Result::Ok(::core::option::Option::None)
            }

            fn encode(
                &self,
            ) -> ::core::result::Result<::warden::event::PendingEvent, ::warden::event::EncodeError> {
                match self {
                    #(Self::#variant_names(inner) => ::warden::event::PendingEvent::new(inner)),*
                }
            }
        }

        #(
            impl ::core::convert::From<#event_types> for #event_enum_name {
                fn from(event: #event_types) -> Self {
                    Self::#variant_names(event)
                }
            }
        )*

        impl #impl_generics ::warden::write_model::WriteModel for #struct_name #ty_generics #where_clause {
            const AGGREGATE_TYPE: &'static str = #aggregate;
            type Event = #event_enum_name;

            fn apply(&mut self, event: &Self::Event) {
                match event {
                    #(#event_enum_name::#variant_names(e) => {
                        <Self as ::warden::write_model::Apply<#event_types>>::apply(self, e);
                    })*
                }
            }

            fn exists(&self) -> bool {
                ::warden::write_model::State::exists(&self.#state_field)
            }
        }
    }
}
