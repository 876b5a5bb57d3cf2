//! Derives `utils::bytes::{Cast, Unaligned}` for a fixed-layout struct, so it can be read and
//! written as raw wire bytes. Adapted from a teacher macro that also supported generic structs
//! wrapping an arbitrary-width bitfield integer; this protocol never needs that, so the derive
//! here only has to handle plain, non-generic `#[repr(C)]` / `#[repr(packed)]` / `#[repr(transparent)]`
//! structs.

use proc_macro2::{Spacing, Span, TokenStream, TokenTree};
use quote::quote;
use syn::punctuated::Punctuated;
use syn::token::Plus;
use syn::{parse_macro_input, Data, DataEnum, DataUnion, DeriveInput, Error, Meta, MetaList, PredicateType, TraitBound, TypeParamBound};

fn trait_bound(path: &[&str]) -> TypeParamBound {
	let mut bound = TraitBound {
		lifetimes: None,
		paren_token: None,
		modifier: syn::TraitBoundModifier::None,
		path: syn::Path {
			leading_colon: Some(Default::default()),
			segments: Punctuated::new(),
		},
	};

	for ident in path {
		bound.path.segments.push(syn::PathSegment {
			ident: syn::Ident::new(ident, Span::call_site()),
			arguments: syn::PathArguments::None,
		})
	}

	bound.into()
}

#[proc_macro_derive(Cast)]
pub fn bytes(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
	let DeriveInput { attrs, ident: name, generics, data, .. } = parse_macro_input!(item as DeriveInput);

	if !generics.params.is_empty() {
		return Error::new(generics.span_or_call_site(), "Generic structs are not supported.")
			.to_compile_error()
			.into();
	}

	// One of "C", "packed", or "transparent".
	let mut repr: Option<&'static str> = None;

	for attr in attrs {
		if let Meta::List(MetaList { path, tokens, .. }) = attr.meta {
			if path.is_ident("repr") {
				let mut last_was_delim = true;

				for token in tokens {
					match token {
						TokenTree::Punct(punct) if !last_was_delim && punct.as_char() == ',' && punct.spacing() == Spacing::Alone => {
							last_was_delim = true;
							continue;
						}
						TokenTree::Ident(ident) if last_was_delim && ident == "C" => repr = Some("C"),
						TokenTree::Ident(ident) if last_was_delim && ident == "transparent" => repr = Some("transparent"),
						TokenTree::Ident(ident) if last_was_delim && ident == "packed" => repr = Some("packed"),
						_ => return Error::new(token.span(), "Unexpected token").to_compile_error().into(),
					}

					last_was_delim = false;
				}
			}
		}
	}

	let Some(repr) = repr else {
		return Error::new(Span::call_site(), "Struct needs explicit repr(C), repr(transparent), or repr(packed)")
			.to_compile_error()
			.into();
	};

	let needs_size_check = repr == "C";
	let unconditional_unaligned = repr == "packed";

	let mut cast_predicates = Punctuated::<syn::WherePredicate, syn::token::Comma>::new();
	let mut unaligned_predicates = Punctuated::<syn::WherePredicate, syn::token::Comma>::new();
	let mut fields_size = Punctuated::<TokenStream, Plus>::new();

	match data {
		Data::Struct(obj) => {
			for field in obj.fields {
				let ty = field.ty;

				if needs_size_check {
					fields_size.push(quote! { ::core::mem::size_of::<#ty>() });
				}

				let mut cast_predicate = PredicateType {
					bounded_ty: ty.clone(),
					lifetimes: None,
					colon_token: Default::default(),
					bounds: Punctuated::new(),
				};
				cast_predicate.bounds.push(trait_bound(&["utils", "bytes", "Cast"]));
				cast_predicates.push(cast_predicate.into());

				if !unconditional_unaligned {
					let mut unaligned_predicate = PredicateType {
						bounded_ty: ty,
						lifetimes: None,
						colon_token: Default::default(),
						bounds: Punctuated::new(),
					};
					unaligned_predicate.bounds.push(trait_bound(&["utils", "bytes", "Unaligned"]));
					unaligned_predicates.push(unaligned_predicate.into());
				}
			}
		}
		Data::Enum(DataEnum { enum_token, .. }) => return Error::new_spanned(enum_token, "Enums are not supported.").to_compile_error().into(),
		Data::Union(DataUnion { union_token, .. }) => return Error::new_spanned(union_token, "Unions are not supported.").to_compile_error().into(),
	};

	let no_padding = if !fields_size.is_empty() {
		quote! { ::utils::bytes::cast::V<{ #fields_size }>: ::utils::bytes::cast::Eq<{ ::std::mem::size_of::<#name>() }>, }
	} else {
		TokenStream::new()
	};

	quote! {
		unsafe impl ::utils::bytes::Cast for #name where
			#no_padding
			#cast_predicates
		{}

		unsafe impl ::utils::bytes::Unaligned for #name where
			#unaligned_predicates
		{}
	}
	.into()
}

trait SpanOrCallSite {
	fn span_or_call_site(&self) -> Span;
}

impl SpanOrCallSite for syn::Generics {
	fn span_or_call_site(&self) -> Span {
		use syn::spanned::Spanned;
		self.span()
	}
}
