#![allow(unreachable_pub)]
#![allow(clippy::needless_pass_by_value)]

//! # Macros
//!
//! Procedural macros for the notice event bus.
//!
//! * [`macro@notice_error`] turns an enum into a context-aware `thiserror` error.
//! * [`macro@listener`] discovers `#[subscribe]` handler methods on an inherent `impl` block
//!   and implements `notice_bus::Listener` for the type.
//! * [`macro@Event`] implements `notice_bus::Event`, optionally declaring supertypes through
//!   `#[event(extends)]` fields.
//!
//! The generated code refers to `::notice_bus` and `::thiserror`, so consuming crates
//! must depend on both.

mod macros;

use proc_macro::TokenStream;
use syn::{DeriveInput, ItemImpl, parse_macro_input};

/// Attribute macro for defining crate error enums.
///
/// # Features
///
/// * **Automatic Derives**: Injects `#[derive(Debug, thiserror::Error)]` unless already present.
/// * **Context Support**: Generates a companion `<Name>Ext` trait that adds `.context()`
///   to any `Result` that can be converted into this error type.
/// * **Standard Conversions**: Implements `From<T>` for variants holding a `source` field
///   (or a field marked `#[source]`/`#[from]`), enabling the `?` operator.
///
/// # Requirements
///
/// 1. The macro must be applied to an **enum** with named-field variants.
/// 2. A `context` field must be typed `Option<Cow<'static, str>>`.
/// 3. Variants wrapping an upstream error must also carry a `context` field.
///
/// # Example
///
/// ```rust,ignore
/// use std::borrow::Cow;
///
/// #[notice_derive::notice_error]
/// pub enum BusError {
///     #[error("Runtime unavailable{}: {source}", format_context(.context))]
///     Runtime { source: tokio::runtime::TryCurrentError, context: Option<Cow<'static, str>> },
///
///     #[error("Bad key{}: {message}", format_context(.context))]
///     BadKey { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
/// }
/// ```
#[proc_macro_attribute]
pub fn notice_error(_args: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    macros::error::expand_error(input).into()
}

/// Attribute macro that turns an inherent `impl` block into an event listener.
///
/// Every method tagged `#[subscribe]` becomes a handler declaration. A handler takes
/// `&self` and exactly one shared reference to an event type, and returns either `()`
/// or a `Result` whose error converts into `notice_bus::HandlerError`.
///
/// # Arguments of `#[subscribe]`
///
/// * `key = "..."` - routing key the handler listens on (defaults to `"default"`).
/// * `concurrent` - allow concurrent invocations; handlers are serialized otherwise.
///
/// # Errors
///
/// Emits a compile-time error naming the method when a tagged method does not take
/// exactly one event parameter, takes it by value, or is `async`.
///
/// # Example
///
/// ```rust,ignore
/// use notice_bus::prelude::*;
///
/// struct Billing;
///
/// #[notice_derive::listener]
/// impl Billing {
///     #[subscribe(key = "1")]
///     fn on_task(&self, event: &TaskEvent) {
///         tracing::info!(?event, "billing task");
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn listener(args: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemImpl);
    macros::listener::expand_listener(args.into(), input).into()
}

/// Derive macro implementing `notice_bus::Event`.
///
/// Fields tagged `#[event(extends)]` declare the field's type as a supertype of the
/// annotated type. Handlers subscribed to the supertype receive the field's value when
/// the annotated type is posted.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Debug, notice_derive::Event)]
/// struct Audited { actor: String }
///
/// #[derive(Debug, notice_derive::Event)]
/// struct Deleted {
///     #[event(extends)]
///     audit: Audited,
///     id: u64,
/// }
/// ```
#[proc_macro_derive(Event, attributes(event))]
pub fn derive_event(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    macros::event::expand_event(input).into()
}
