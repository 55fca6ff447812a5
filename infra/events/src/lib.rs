//! # Notice Bus
//!
//! An in-process publish/subscribe event bus with routing keys.
//!
//! ## Overview
//!
//! Producers post events tagged with a routing key. Every handler registered for the
//! same routing key and for the event's type, or any of its supertypes, is invoked
//! according to the bus's [`Dispatcher`].
//!
//! ## Features
//!
//! * **Routing keys**: the same event type can be routed differently per key.
//! * **Type hierarchies**: handlers of a supertype receive its subtypes
//!   (`#[derive(Event)]` with `#[event(extends)]`).
//! * **Three dispatch strategies**: per-thread queued, concurrent queue, immediate.
//! * **Failure isolation**: handler errors and panics go to a
//!   [`SubscriberExceptionHandler`]; the remaining handlers still run.
//! * **Fail loud**: posting an event nobody listens to is an error. The payload is
//!   also re-posted as an [`UnroutedEvent`] under [`UNROUTED_KEY`] for catch-all handlers.
//!
//! # Example
//!
//! ```rust
//! use notice_bus::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Debug, Event)]
//! struct TaskEvent {
//!     task_id: String,
//! }
//!
//! struct Billing;
//!
//! #[listener]
//! impl Billing {
//!     #[subscribe(key = "1")]
//!     fn on_task(&self, event: &TaskEvent) {
//!         assert_eq!(event.task_id, "42");
//!     }
//! }
//!
//! fn main() -> Result<(), EventBusError> {
//!     let bus = EventBus::new();
//!     bus.register(&Arc::new(Billing))?;
//!     bus.post_event("1", TaskEvent { task_id: "42".into() })?;
//!     Ok(())
//! }
//! ```

mod bus;
mod config;
mod dispatcher;
mod error;
mod event;
mod executor;
mod listener;
mod registry;
mod subscriber;

pub use bus::{DEFAULT_IDENTIFIER, EventBus, EventBusBuilder};
pub use config::{DEFAULT_HIERARCHY_CACHE_CAPACITY, DispatchStrategy, EventBusConfig, ExecutorKind};
pub use dispatcher::{ConcurrentQueueDispatcher, Dispatcher, PerThreadQueuedDispatcher};
pub use error::{EventBusError, EventBusErrorExt};
pub use event::{
    DEFAULT_KEY, Event, EventIdentity, EventObject, EventType, PostEnvelope, PostEnvelopeBuilder, UNROUTED_KEY,
    UnroutedEvent,
};
pub use executor::{DirectExecutor, Executor, Task, TokioExecutor};
pub use listener::{HandlerError, HandlerMethod, HandlerPanic, HandlerResult, IntoHandlerResult, Listener};
pub use notice_derive::{Event, listener};
pub use registry::Subscribers;
pub use subscriber::{LoggingHandler, Subscriber, SubscriberExceptionContext, SubscriberExceptionHandler};

/// The types needed to declare listeners and post events.
pub mod prelude {
    pub use crate::{
        Event, EventBus, EventBusError, HandlerError, HandlerResult, Listener, PostEnvelope, UNROUTED_KEY,
        UnroutedEvent, listener,
    };
}
