use crate::config::{DEFAULT_HIERARCHY_CACHE_CAPACITY, EventBusConfig, ExecutorKind};
use crate::dispatcher::Dispatcher;
use crate::error::EventBusError;
use crate::event::{Event, PostEnvelope, UNROUTED_KEY, UnroutedEvent};
use crate::executor::{DirectExecutor, Executor, TokioExecutor};
use crate::listener::{HandlerError, Listener};
use crate::registry::SubscriberRegistry;
use crate::subscriber::{LoggingHandler, SubscriberExceptionContext, SubscriberExceptionHandler, panic_message};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

/// Identifier of buses built without one.
pub const DEFAULT_IDENTIFIER: &str = "default";

pub(crate) struct EventBusInner {
    identifier: Arc<str>,
    registry: SubscriberRegistry,
    dispatcher: Dispatcher,
    exception_handler: Box<dyn SubscriberExceptionHandler>,
}

/// Routes posted events to the handlers registered for their routing key and type.
///
/// Cloning is cheap; clones share the same registry and dispatcher.
///
/// # Examples
/// ```rust
/// use notice_bus::{EventBus, EventBusError, listener};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Debug, notice_bus::Event)]
/// struct TaskEvent {
///     task_id: String,
/// }
///
/// #[derive(Default)]
/// struct TaskService {
///     handled: AtomicUsize,
/// }
///
/// #[listener]
/// impl TaskService {
///     #[subscribe(key = "1")]
///     fn on_task(&self, _event: &TaskEvent) {
///         self.handled.fetch_add(1, Ordering::SeqCst);
///     }
/// }
///
/// # fn main() -> Result<(), EventBusError> {
/// let bus = EventBus::new();
/// let service = Arc::new(TaskService::default());
/// bus.register(&service)?;
///
/// bus.post_event("1", TaskEvent { task_id: "x".into() })?;
/// assert_eq!(service.handled.load(Ordering::SeqCst), 1);
///
/// // Nothing listens on "9": posting there is an error.
/// assert!(bus.post_event("9", TaskEvent { task_id: "y".into() }).is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl EventBus {
    /// Creates a bus named `"default"` with per-thread queued dispatch, inline
    /// execution and the logging exception handler.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Same as [`EventBus::new`] with a custom identifier.
    #[must_use]
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self::builder().identifier(identifier).build()
    }

    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    /// Builds a bus from its declarative configuration.
    ///
    /// # Errors
    /// Returns [`EventBusError::Runtime`] if the `tokio` executor is requested
    /// outside of a tokio runtime.
    pub fn from_config(config: &EventBusConfig) -> Result<Self, EventBusError> {
        let executor: Arc<dyn Executor> = match config.executor {
            ExecutorKind::Direct => Arc::new(DirectExecutor),
            ExecutorKind::Tokio => Arc::new(TokioExecutor::current()?),
        };
        Ok(Self::builder()
            .identifier(config.identifier.clone())
            .dispatcher(config.dispatch.into())
            .executor(executor)
            .hierarchy_cache_capacity(config.hierarchy_cache_capacity)
            .build())
    }

    pub(crate) const fn from_inner(inner: Arc<EventBusInner>) -> Self {
        Self { inner }
    }

    /// Name of the bus, used in logs.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Registers every handler declared by `listener`.
    ///
    /// Registering the same instance twice does not duplicate deliveries.
    ///
    /// The bus keeps a strong reference to `listener` until [`EventBus::unregister`].
    /// A listener that holds a clone of this bus forms a reference cycle with it, so
    /// neither is freed before it is unregistered.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidHandler`] if a declaration is malformed; nothing
    /// is registered in that case.
    pub fn register<L: Listener>(&self, listener: &Arc<L>) -> Result<(), EventBusError> {
        self.inner.registry.register(listener)?;
        debug!(bus = %self.inner.identifier, listener = std::any::type_name::<L>(), "Listener registered");
        Ok(())
    }

    /// Removes every handler `register` added for this `listener` instance.
    ///
    /// # Errors
    /// Returns [`EventBusError::NotRegistered`] if the instance is not registered.
    pub fn unregister<L: Listener>(&self, listener: &Arc<L>) -> Result<(), EventBusError> {
        self.inner.registry.unregister(listener)?;
        debug!(bus = %self.inner.identifier, listener = std::any::type_name::<L>(), "Listener unregistered");
        Ok(())
    }

    /// Delivers the envelope's payload to every matching handler.
    ///
    /// Handler failures never surface here; they go to the exception handler.
    ///
    /// # Errors
    /// Returns [`EventBusError::NoSubscribers`] if no handler matches the routing key
    /// and the payload type or any of its supertypes. Before failing, the payload is
    /// re-posted as an [`UnroutedEvent`] under [`UNROUTED_KEY`] so that catch-all
    /// handlers can observe it.
    pub fn post(&self, envelope: PostEnvelope) -> Result<(), EventBusError> {
        let subscribers = self.inner.registry.get_subscribers(&envelope);
        if !subscribers.is_empty() {
            trace!(
                bus = %self.inner.identifier,
                routing_key = envelope.routing_key(),
                subscribers = subscribers.len(),
                "Dispatching event"
            );
            self.inner.dispatcher.dispatch(envelope.into_event(), subscribers);
            return Ok(());
        }

        if envelope.event().is::<UnroutedEvent>() {
            trace!(bus = %self.inner.identifier, "No catch-all subscriber for unrouted event");
            return Ok(());
        }

        let identity = envelope.identity();
        warn!(
            bus = %self.inner.identifier,
            routing_key = envelope.routing_key(),
            event = ?envelope.event(),
            "No subscribers for event"
        );
        let unrouted = UnroutedEvent::new(Arc::clone(&self.inner.identifier), envelope);
        self.post(PostEnvelope::new(UNROUTED_KEY, unrouted)?)?;

        Err(EventBusError::NoSubscribers {
            message: format!("nothing is subscribed to {identity}").into(),
            context: Some(format!("bus {}", self.inner.identifier).into()),
        })
    }

    /// Shorthand for building a [`PostEnvelope`] and posting it.
    ///
    /// # Errors
    /// See [`PostEnvelope::new`] and [`EventBus::post`].
    pub fn post_event(&self, routing_key: impl Into<String>, event: impl Event) -> Result<(), EventBusError> {
        self.post(PostEnvelope::new(routing_key, event)?)
    }

    /// Forwards a handler failure to the configured exception handler.
    ///
    /// A panic raised by the exception handler itself is logged and swallowed.
    pub fn handle_subscriber_exception(&self, cause: HandlerError, context: &SubscriberExceptionContext) {
        let handled = panic::catch_unwind(AssertUnwindSafe(|| self.inner.exception_handler.handle(cause, context)));
        if let Err(payload) = handled {
            error!(
                bus = %self.inner.identifier,
                listener = context.listener(),
                method = context.method(),
                panic = %panic_message(payload.as_ref()),
                "Exception handler panicked while handling a subscriber failure"
            );
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("identifier", &self.inner.identifier)
            .field("dispatcher", &self.inner.dispatcher.strategy())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

/// Programmatic bus construction; unset parts fall back to the [`EventBus::new`] defaults.
#[must_use = "builders do nothing unless you call .build()"]
pub struct EventBusBuilder {
    identifier: String,
    dispatcher: Option<Dispatcher>,
    executor: Arc<dyn Executor>,
    exception_handler: Box<dyn SubscriberExceptionHandler>,
    hierarchy_cache_capacity: u64,
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self {
            identifier: DEFAULT_IDENTIFIER.to_owned(),
            dispatcher: None,
            executor: Arc::new(DirectExecutor),
            exception_handler: Box::new(LoggingHandler),
            hierarchy_cache_capacity: DEFAULT_HIERARCHY_CACHE_CAPACITY,
        }
    }
}

impl EventBusBuilder {
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Execution context handlers are invoked on.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn exception_handler(mut self, handler: impl SubscriberExceptionHandler) -> Self {
        self.exception_handler = Box::new(handler);
        self
    }

    /// Upper bound on memoized event hierarchies. Evicted entries are recomputed.
    pub const fn hierarchy_cache_capacity(mut self, capacity: u64) -> Self {
        self.hierarchy_cache_capacity = capacity;
        self
    }

    pub fn build(self) -> EventBus {
        let inner = Arc::new_cyclic(|bus: &Weak<EventBusInner>| EventBusInner {
            identifier: self.identifier.into(),
            registry: SubscriberRegistry::new(Weak::clone(bus), self.executor, self.hierarchy_cache_capacity),
            dispatcher: self.dispatcher.unwrap_or_default(),
            exception_handler: self.exception_handler,
        });
        EventBus::from_inner(inner)
    }
}

impl fmt::Debug for EventBusBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBusBuilder")
            .field("identifier", &self.identifier)
            .field("dispatcher", &self.dispatcher)
            .field("executor", &self.executor)
            .field("hierarchy_cache_capacity", &self.hierarchy_cache_capacity)
            .finish_non_exhaustive()
    }
}
