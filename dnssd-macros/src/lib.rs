extern crate proc_macro;

use crate::proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{self, Data, DeriveInput, Fields, Ident, LitInt, LitStr, parse_macro_input};

/// Implements `crate::prelude::BuilderDelegate` for a type deriving `derive_builder::Builder`,
/// giving it a `builder()` constructor.
#[proc_macro_derive(BuilderDelegate)]
pub fn builder_delegate_macro_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    impl_builder_delegate(&ast).into()
}

fn impl_builder_delegate(ast: &DeriveInput) -> TokenStream2 {
    let name = &ast.ident;
    let builder = format_ident!("{}Builder", name);
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    quote! {
        impl #impl_generics crate::prelude::BuilderDelegate<#builder #ty_generics>
            for #name #ty_generics #where_clause {}
    }
}

/// Generates the flag lookup table for a fieldless enum.
///
/// Each variant takes a `#[flag(bit = ..)]` attribute and an optional `name = ".."`; when the
/// name is omitted the snake_case form of the variant is used. The derive adds `ALL`, `TABLE`,
/// `bits()`, `name()` and `from_name()` to the enum.
#[proc_macro_derive(FlagTable, attributes(flag))]
pub fn flag_table_macro_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    impl_flag_table(&ast)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

struct FlagVariant {
    ident: Ident,
    bit: u32,
    name: String,
}

fn impl_flag_table(ast: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &ast.ident;

    let Data::Enum(data) = &ast.data else {
        return Err(syn::Error::new_spanned(
            ast,
            "FlagTable can only be derived for enums",
        ));
    };

    let mut flags = Vec::with_capacity(data.variants.len());
    let mut seen_bits = 0u32;

    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "FlagTable variants cannot carry fields",
            ));
        }

        let mut bit = None;
        let mut flag_name = None;

        for attr in variant.attrs.iter().filter(|a| a.path().is_ident("flag")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("bit") {
                    let lit: LitInt = meta.value()?.parse()?;
                    bit = Some(lit.base10_parse::<u32>()?);
                    Ok(())
                } else if meta.path.is_ident("name") {
                    let lit: LitStr = meta.value()?.parse()?;
                    flag_name = Some(lit.value());
                    Ok(())
                } else {
                    Err(meta.error("expected `bit` or `name`"))
                }
            })?;
        }

        let bit = bit.ok_or_else(|| {
            syn::Error::new_spanned(variant, "missing `#[flag(bit = ...)]` attribute")
        })?;

        if bit.count_ones() != 1 {
            return Err(syn::Error::new_spanned(
                variant,
                "flag bit must be a single power of two",
            ));
        }

        if seen_bits & bit != 0 {
            return Err(syn::Error::new_spanned(variant, "duplicate flag bit"));
        }
        seen_bits |= bit;

        flags.push(FlagVariant {
            name: flag_name.unwrap_or_else(|| snake_case(&variant.ident.to_string())),
            ident: variant.ident.clone(),
            bit,
        });
    }

    let count = flags.len();
    let paths: Vec<_> = flags
        .iter()
        .map(|f| {
            let ident = &f.ident;
            quote!(#name::#ident)
        })
        .collect();
    let bits: Vec<_> = flags.iter().map(|f| f.bit).collect();
    let names: Vec<_> = flags.iter().map(|f| f.name.as_str()).collect();

    Ok(quote! {
        impl #name {
            /// Every flag in declaration order.
            pub const ALL: [#name; #count] = [#(#paths),*];

            /// Name and bit value of every flag in declaration order.
            pub const TABLE: [(&'static str, u32); #count] = [#((#names, #bits)),*];

            /// Returns the bit value of this flag.
            pub const fn bits(self) -> u32 {
                match self {
                    #(#paths => #bits,)*
                }
            }

            /// Returns the snake_case name of this flag.
            pub const fn name(self) -> &'static str {
                match self {
                    #(#paths => #names,)*
                }
            }

            /// Looks up a flag by its snake_case name.
            pub fn from_name(name: &str) -> ::std::option::Option<Self> {
                match name {
                    #(#names => ::std::option::Option::Some(#paths),)*
                    _ => ::std::option::Option::None,
                }
            }
        }
    })
}

fn snake_case(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 4);
    for (i, c) in ident.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
