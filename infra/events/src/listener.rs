use crate::event::{DEFAULT_KEY, Event, EventType};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Failure cause reported by a handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a single handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// A handler panicked; carries the panic message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("handler panicked: {message}")]
pub struct HandlerPanic {
    pub message: String,
}

/// Converts handler return values into a [`HandlerResult`].
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> HandlerResult;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> HandlerResult {
        Ok(())
    }
}

impl<T, E: Into<HandlerError>> IntoHandlerResult for Result<T, E> {
    fn into_handler_result(self) -> HandlerResult {
        self.map(drop).map_err(Into::into)
    }
}

type Thunk<L> = dyn Fn(&L, &dyn Event) -> Option<HandlerResult> + Send + Sync;

/// A handler declared by a [`Listener`]: method name, routing key, accepted payload
/// type(s) and the invocation thunk.
///
/// The thunk returns `None` when it cannot view the payload as its parameter type,
/// which indicates a routing defect rather than a handler failure.
pub struct HandlerMethod<L> {
    name: &'static str,
    routing_key: Cow<'static, str>,
    params: Vec<EventType>,
    concurrent: bool,
    thunk: Arc<Thunk<L>>,
}

impl<L: 'static> HandlerMethod<L> {
    /// Declares a handler for events of type `E` under the default routing key.
    ///
    /// # Examples
    /// ```rust
    /// use notice_bus::{HandlerMethod, Listener};
    ///
    /// #[derive(Debug, notice_bus::Event)]
    /// struct Ping;
    ///
    /// struct Pong;
    ///
    /// impl Listener for Pong {
    ///     fn handlers() -> Vec<HandlerMethod<Self>> {
    ///         vec![HandlerMethod::new::<Ping, _>("on_ping", |_, _| ()).routing_key("1")]
    ///     }
    /// }
    /// ```
    pub fn new<E, R>(name: &'static str, handler: impl Fn(&L, &E) -> R + Send + Sync + 'static) -> Self
    where
        E: Event,
        R: IntoHandlerResult,
    {
        Self {
            name,
            routing_key: Cow::Borrowed(DEFAULT_KEY),
            params: vec![EventType::of::<E>()],
            concurrent: false,
            thunk: Arc::new(move |listener: &L, event: &dyn Event| {
                event.view::<E>().map(|event| handler(listener, event).into_handler_result())
            }),
        }
    }

    /// Declares an untyped handler with an explicit parameter list.
    ///
    /// The parameter list is validated at registration: anything but exactly one
    /// parameter is rejected.
    pub fn raw(
        name: &'static str,
        params: Vec<EventType>,
        handler: impl Fn(&L, &dyn Event) -> Option<HandlerResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            routing_key: Cow::Borrowed(DEFAULT_KEY),
            params,
            concurrent: false,
            thunk: Arc::new(handler),
        }
    }

    /// Sets the routing key the handler listens on.
    #[must_use]
    pub fn routing_key(mut self, routing_key: impl Into<Cow<'static, str>>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    /// Allows concurrent invocations of this handler.
    #[must_use]
    pub const fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }
}

impl<L> HandlerMethod<L> {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.routing_key
    }

    #[must_use]
    pub fn params(&self) -> &[EventType] {
        &self.params
    }

    #[must_use]
    pub const fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    pub(crate) fn thunk(&self) -> Arc<Thunk<L>> {
        Arc::clone(&self.thunk)
    }
}

impl<L> Clone for HandlerMethod<L> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            routing_key: self.routing_key.clone(),
            params: self.params.clone(),
            concurrent: self.concurrent,
            thunk: Arc::clone(&self.thunk),
        }
    }
}

impl<L> fmt::Debug for HandlerMethod<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerMethod")
            .field("name", &self.name)
            .field("routing_key", &self.routing_key)
            .field("params", &self.params)
            .field("concurrent", &self.concurrent)
            .finish_non_exhaustive()
    }
}

/// An object exposing event handlers.
///
/// Usually implemented through `#[notice_bus::listener]` on an inherent `impl` block.
pub trait Listener: Send + Sync + 'static {
    /// Declares the handlers of this listener type.
    ///
    /// Called once per type; the result is cached by the registry.
    fn handlers() -> Vec<HandlerMethod<Self>>
    where
        Self: Sized;
}
