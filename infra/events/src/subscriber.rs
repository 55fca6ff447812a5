use crate::bus::{EventBus, EventBusInner};
use crate::event::{Event, EventType};
use crate::executor::Executor;
use crate::listener::{HandlerError, HandlerMethod, HandlerPanic, HandlerResult, Listener};
use parking_lot::ReentrantMutex;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{error, warn};

type Invoke = dyn Fn(&dyn Event) -> Option<HandlerResult> + Send + Sync;

/// Identity of a subscriber: the listener instance plus the handler method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscriberKey {
    target: usize,
    method: &'static str,
}

impl SubscriberKey {
    pub(crate) fn of<L>(target: &Arc<L>, method: &'static str) -> Self {
        Self { target: Arc::as_ptr(target).cast::<()>().addr(), method }
    }
}

/// One handler method bound to one listener instance.
///
/// Invocations go through the subscriber's executor. Handler failures and panics
/// are isolated here and forwarded to the owning bus's exception handler.
pub struct Subscriber {
    bus: Weak<EventBusInner>,
    key: SubscriberKey,
    target: Arc<dyn Any + Send + Sync>,
    listener: &'static str,
    param: EventType,
    executor: Arc<dyn Executor>,
    lock: Option<ReentrantMutex<()>>,
    invoke: Box<Invoke>,
}

impl Subscriber {
    pub(crate) fn new<L: Listener>(
        bus: Weak<EventBusInner>,
        target: &Arc<L>,
        method: &HandlerMethod<L>,
        param: EventType,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let listener = Arc::clone(target);
        let thunk = method.thunk();
        Self {
            bus,
            key: SubscriberKey::of(target, method.name()),
            target: Arc::clone(target) as Arc<dyn Any + Send + Sync>,
            listener: std::any::type_name::<L>(),
            param,
            executor,
            lock: (!method.is_concurrent()).then(|| ReentrantMutex::new(())),
            invoke: Box::new(move |event: &dyn Event| thunk(listener.as_ref(), event)),
        }
    }

    pub(crate) const fn key(&self) -> SubscriberKey {
        self.key
    }

    /// Type name of the listener the handler belongs to.
    #[must_use]
    pub const fn listener(&self) -> &'static str {
        self.listener
    }

    #[must_use]
    pub const fn method(&self) -> &'static str {
        self.key.method
    }

    /// The payload type the handler declares.
    #[must_use]
    pub const fn param(&self) -> EventType {
        self.param
    }

    /// Whether invocations of this handler are serialized.
    ///
    /// The lock is reentrant: a handler that synchronously posts an event back to
    /// itself on the same thread does not deadlock.
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        self.lock.is_some()
    }

    /// Submits the invocation for `event` to the subscriber's executor.
    pub(crate) fn dispatch_event(self: &Arc<Self>, event: Arc<dyn Event>) {
        let subscriber = Arc::clone(self);
        self.executor.execute(Box::new(move || subscriber.invoke(&event)));
    }

    fn invoke(&self, event: &Arc<dyn Event>) {
        let outcome = {
            let _guard = self.lock.as_ref().map(ReentrantMutex::lock);
            panic::catch_unwind(AssertUnwindSafe(|| (self.invoke)(event.as_ref())))
        };

        let cause: HandlerError = match outcome {
            Ok(Some(Ok(()))) => return,
            Ok(Some(Err(cause))) => cause,
            Err(payload) => Box::new(HandlerPanic { message: panic_message(payload.as_ref()) }),
            Ok(None) => panic!(
                "{}::{} accepts {} but was dispatched {:?}",
                self.listener, self.key.method, self.param, event
            ),
        };
        self.report(event, cause);
    }

    fn report(&self, event: &Arc<dyn Event>, cause: HandlerError) {
        let Some(inner) = self.bus.upgrade() else {
            warn!(
                listener = self.listener,
                method = self.key.method,
                error = %cause,
                "Subscriber failed after its event bus was dropped"
            );
            return;
        };
        let bus = EventBus::from_inner(inner);
        let context = SubscriberExceptionContext {
            bus: bus.clone(),
            event: Arc::clone(event),
            target: Arc::clone(&self.target),
            listener: self.listener,
            method: self.key.method,
            param: self.param,
        };
        bus.handle_subscriber_exception(cause, &context);
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Subscriber {}

impl Hash for Subscriber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("listener", &self.listener)
            .field("method", &self.key.method)
            .field("param", &self.param)
            .field("exclusive", &self.is_exclusive())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Where a handler failure happened.
#[derive(Clone)]
pub struct SubscriberExceptionContext {
    bus: EventBus,
    event: Arc<dyn Event>,
    target: Arc<dyn Any + Send + Sync>,
    listener: &'static str,
    method: &'static str,
    param: EventType,
}

impl SubscriberExceptionContext {
    /// The bus that dispatched the event.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub const fn event(&self) -> &Arc<dyn Event> {
        &self.event
    }

    /// The listener instance whose handler failed.
    #[must_use]
    pub const fn target(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.target
    }

    /// Address of the listener instance. Tells apart failing instances of one type.
    #[must_use]
    pub fn target_address(&self) -> usize {
        Arc::as_ptr(&self.target).cast::<()>().addr()
    }

    #[must_use]
    pub const fn listener(&self) -> &'static str {
        self.listener
    }

    #[must_use]
    pub const fn method(&self) -> &'static str {
        self.method
    }

    #[must_use]
    pub const fn param(&self) -> EventType {
        self.param
    }
}

impl fmt::Debug for SubscriberExceptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberExceptionContext")
            .field("bus", &self.bus.identifier())
            .field("event", &self.event)
            .field("listener", &self.listener)
            .field("method", &self.method)
            .field("param", &self.param)
            .finish_non_exhaustive()
    }
}

/// Receives failures raised by handlers.
///
/// Implemented for any `Fn(HandlerError, &SubscriberExceptionContext)` closure.
pub trait SubscriberExceptionHandler: Send + Sync + 'static {
    fn handle(&self, cause: HandlerError, context: &SubscriberExceptionContext);
}

impl<F> SubscriberExceptionHandler for F
where
    F: Fn(HandlerError, &SubscriberExceptionContext) + Send + Sync + 'static,
{
    fn handle(&self, cause: HandlerError, context: &SubscriberExceptionContext) {
        self(cause, context);
    }
}

/// Default exception handler: logs the failure and swallows it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl SubscriberExceptionHandler for LoggingHandler {
    fn handle(&self, cause: HandlerError, context: &SubscriberExceptionContext) {
        let method = format!("{}({})", context.method(), context.param());
        let instance = format!("{:#x}", context.target_address());
        error!(
            bus = %context.bus().identifier(),
            event = ?context.event(),
            listener = context.listener(),
            instance = %instance,
            method = %method,
            error = %cause,
            "Exception thrown by subscriber method"
        );
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
