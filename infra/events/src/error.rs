use std::borrow::Cow;

/// Errors surfaced to callers of the [`EventBus`](crate::EventBus).
///
/// All of them are configuration errors: they abort the triggering call. Failures raised
/// by handler code never show up here; they are funneled to the bus's
/// [`SubscriberExceptionHandler`](crate::SubscriberExceptionHandler) instead.
#[notice_derive::notice_error]
pub enum EventBusError {
    /// A handler declaration is malformed (wrong parameter count, blank routing key).
    #[error("Invalid handler{}: {message}", format_context(.context))]
    InvalidHandler { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A listener (or one of its handler groups) was never registered.
    #[error("Listener not registered{}: {message}", format_context(.context))]
    NotRegistered { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Nothing is subscribed to the posted event.
    #[error("No subscribers{}: {message}", format_context(.context))]
    NoSubscribers { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The routing key or the payload of a post is missing.
    #[error("Invalid envelope{}: {message}", format_context(.context))]
    InvalidEnvelope { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A runtime-backed executor was requested outside of a tokio runtime.
    #[error("Runtime unavailable{}: {source}", format_context(.context))]
    Runtime { source: tokio::runtime::TryCurrentError, context: Option<Cow<'static, str>> },
}
