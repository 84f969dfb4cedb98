use quote::quote;
use syn::{DeriveInput, parse_macro_input};

#[proc_macro_derive(Smooth, attributes(dimension))]
pub fn derive_smooth(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match derive_smooth_impl(input) {
        Ok(token_stream) => token_stream,
        Err(e) => e.to_compile_error().into(),
    }
}

fn parse_dimension(attr: &syn::Attribute) -> syn::Result<Option<usize>> {
    if !attr.path().is_ident("dimension") {
        return Ok(None);
    }
    if let syn::Meta::NameValue(meta) = &attr.meta {
        if let syn::Expr::Lit(val) = &meta.value {
            if let syn::Lit::Int(v) = &val.lit {
                return v.base10_parse::<usize>().map(Some);
            }
        }
    }
    Err(syn::Error::new_spanned(
        attr,
        "expected #[dimension = <d>] with an integer literal",
    ))
}

fn derive_smooth_impl(input: DeriveInput) -> syn::Result<proc_macro::TokenStream> {
    let name = input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut dimension: Option<usize> = None;
    for attr in &input.attrs {
        if let Some(d) = parse_dimension(attr)? {
            dimension = Some(d);
        }
    }

    let dim = dimension.ok_or_else(|| {
        syn::Error::new_spanned(
            name.clone(),
            "Missing #[dimension = <d>] attribute where d of type usize is equal to the number of arguments of the smooth function",
        )
    })?;

    let expanded = quote! {
        impl #impl_generics Smooth<#dim> for #name #ty_generics #where_clause {
            fn val(&self, x: &nalgebra::SVector<f64, #dim>) -> f64 {
                self.f(x)
            }

            fn val_grad(&self, x: &nalgebra::SVector<f64, #dim>) -> (f64, nalgebra::SVector<f64, #dim>) {
                num_dual::gradient(|v| self.f(&v), *x)
            }

            fn val_grad_hes(&self, x: &nalgebra::SVector<f64, #dim>) -> (f64, nalgebra::SVector<f64, #dim>, nalgebra::SMatrix<f64, #dim, #dim>) {
                num_dual::hessian(|v| self.f(&v), *x)
            }
        }
    };
    Ok(proc_macro::TokenStream::from(expanded))
}
