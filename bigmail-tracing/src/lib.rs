#![warn(clippy::pedantic)]

extern crate proc_macro;

use std::str::FromStr;

use proc_macro2::TokenStream;
use quote::quote;
use syn::{ItemFn, LitStr, Stmt, parse::Parser, parse_macro_input, parse_quote};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Precision {
    Nanos,
    Micros,
    #[default]
    Millis,
    Seconds,
}

impl FromStr for Precision {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ns" | "nanos" | "nanoseconds" => Ok(Self::Nanos),
            "us" | "micros" | "microseconds" => Ok(Self::Micros),
            "ms" | "millis" | "milliseconds" => Ok(Self::Millis),
            "s" | "secs" | "seconds" => Ok(Self::Seconds),
            _ => Err(()),
        }
    }
}

impl Precision {
    /// Expression reading the guard's elapsed time in this unit.
    fn elapsed(self) -> TokenStream {
        match self {
            Self::Nanos => quote!(self.0.elapsed().as_nanos()),
            Self::Micros => quote!(self.0.elapsed().as_micros()),
            Self::Millis => quote!(self.0.elapsed().as_millis()),
            Self::Seconds => quote!(self.0.elapsed().as_secs()),
        }
    }

    const fn unit(self) -> &'static str {
        match self {
            Self::Nanos => "ns",
            Self::Micros => "us",
            Self::Millis => "ms",
            Self::Seconds => "s",
        }
    }
}

#[derive(Default)]
struct Options {
    instrument: Option<TokenStream>,
    timing: Option<Precision>,
}

fn parse_options(args: TokenStream) -> syn::Result<Options> {
    let mut options = Options::default();

    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("instrument") {
            if options.instrument.is_some() {
                return Err(meta.error("`instrument` given more than once"));
            }

            let forwarded = if meta.input.peek(syn::token::Paren) {
                let content;
                syn::parenthesized!(content in meta.input);
                content.parse::<TokenStream>()?
            } else {
                TokenStream::new()
            };
            options.instrument = Some(forwarded);
            Ok(())
        } else if meta.path.is_ident("timing") {
            if options.timing.is_some() {
                return Err(meta.error("`timing` given more than once"));
            }

            let mut precision = Precision::default();
            if meta.input.peek(syn::token::Paren) {
                meta.parse_nested_meta(|nested| {
                    if !nested.path.is_ident("precision") {
                        return Err(nested.error("expected `precision = \"...\"`"));
                    }
                    let value: LitStr = nested.value()?.parse()?;
                    precision = value
                        .value()
                        .parse()
                        .map_err(|()| syn::Error::new(value.span(), "unknown precision"))?;
                    Ok(())
                })?;
            }
            options.timing = Some(precision);
            Ok(())
        } else {
            Err(meta.error("expected `instrument` or `timing`"))
        }
    });

    parser.parse2(args)?;
    Ok(options)
}

/// Emits `tracing::trace!` events when the attributed function is entered
/// and when it returns (or, for an async fn, when its future is dropped).
///
/// * `timing(precision = "ms")` appends the elapsed time to the exit event;
///   `ns`, `us`, `ms` and `s` are understood.
/// * `instrument(...)` forwards its arguments to `#[tracing::instrument]`.
///
/// The expansion refers to `tracing` by path, so the calling crate must have
/// it in scope.
#[proc_macro_attribute]
pub fn traced(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let options = match parse_options(args.into()) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let mut item = parse_macro_input!(item as ItemFn);

    if let Some(forwarded) = options.instrument {
        let attr: syn::Attribute = if forwarded.is_empty() {
            parse_quote!(#[tracing::instrument])
        } else {
            parse_quote!(#[tracing::instrument(#forwarded)])
        };
        item.attrs.push(attr);
    }
    item.attrs
        .push(parse_quote!(#[allow(clippy::items_after_statements)]));

    let name = item.sig.ident.to_string();
    let on_exit = options.timing.map_or_else(
        || quote!(tracing::trace!("OnExit: {}", #name);),
        |precision| {
            let elapsed = precision.elapsed();
            let unit = precision.unit();
            quote!(tracing::trace!("OnExit: {} ({} {} elapsed)", #name, #elapsed, #unit);)
        },
    );

    let guard: Vec<Stmt> = parse_quote! {
        #[allow(dead_code)]
        struct __TracedGuard(std::time::Instant);

        impl Drop for __TracedGuard {
            fn drop(&mut self) {
                #on_exit
            }
        }

        tracing::trace!("OnEnter: {}", #name);
        let __traced_guard = __TracedGuard(std::time::Instant::now());
    };

    let body = std::mem::take(&mut item.block.stmts);
    item.block.stmts = guard.into_iter().chain(body).collect();

    quote!(#item).into()
}
