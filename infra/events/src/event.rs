use crate::error::EventBusError;
use fxhash::FxHashSet;
use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Routing key used by handlers that do not declare one.
pub const DEFAULT_KEY: &str = "default";

/// Reserved routing key under which [`UnroutedEvent`]s are re-posted.
pub const UNROUTED_KEY: &str = "DEAD";

/// Types that can be posted on the [`EventBus`](crate::EventBus).
///
/// An event may declare supertypes: handlers subscribed to a supertype under the same
/// routing key also receive the event, viewed through [`Event::upcast`]. Use
/// `#[derive(notice_derive::Event)]` with `#[event(extends)]` fields rather than
/// implementing the hierarchy by hand.
pub trait Event: EventObject + Any + Send + Sync + fmt::Debug {
    /// Direct supertypes of this event type.
    fn supertypes() -> Vec<EventType>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// Returns a view of `self` as the ancestor type identified by `target`, if any.
    fn upcast(&self, target: TypeId) -> Option<&dyn Any> {
        let _ = target;
        None
    }
}

/// Object-safe accessors implemented for every [`Event`].
pub trait EventObject {
    /// The payload as [`Any`], for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// The concrete type tag of the payload.
    fn event_type(&self) -> EventType;
}

impl<T: Event> EventObject for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn event_type(&self) -> EventType {
        EventType::of::<T>()
    }
}

impl dyn Event {
    /// Views the payload as `E`, either directly or through one of its ancestors.
    #[must_use]
    pub fn view<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>().or_else(|| {
            self.upcast(TypeId::of::<E>()).and_then(|ancestor| ancestor.downcast_ref::<E>())
        })
    }

    /// Returns `true` when the concrete payload type is `E`.
    #[must_use]
    pub fn is<E: Event>(&self) -> bool {
        self.as_any().is::<E>()
    }
}

/// Runtime type tag of an [`Event`] type.
///
/// Equality and hashing only consider the [`TypeId`].
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
    supertypes: fn() -> Vec<EventType>,
}

impl EventType {
    /// Returns the tag of `T`.
    #[must_use]
    pub fn of<T: Event>() -> Self {
        Self { id: TypeId::of::<T>(), name: std::any::type_name::<T>(), supertypes: T::supertypes }
    }

    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Direct supertypes as declared by the event type.
    #[must_use]
    pub fn supertypes(&self) -> Vec<Self> {
        (self.supertypes)()
    }

    /// The type itself followed by all of its supertypes, transitively and deduplicated.
    ///
    /// Breadth-first; callers must not rely on the order beyond the first element.
    #[must_use]
    pub fn ancestors(&self) -> Vec<Self> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        let mut pending = VecDeque::from([*self]);

        while let Some(ty) = pending.pop_front() {
            if !seen.insert(ty.id) {
                continue;
            }
            pending.extend(ty.supertypes());
            out.push(ty);
        }
        out
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventType").field(&self.name).finish()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A routing key paired with an event type: the unit of subscription matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventIdentity {
    routing_key: Arc<str>,
    event_type: EventType,
}

impl EventIdentity {
    /// Creates an identity.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidEnvelope`] if `routing_key` is blank.
    pub fn new(routing_key: impl AsRef<str>, event_type: EventType) -> Result<Self, EventBusError> {
        let routing_key = validate_key(routing_key.as_ref())?;
        Ok(Self::from_parts(routing_key.into(), event_type))
    }

    pub(crate) fn from_parts(routing_key: Arc<str>, event_type: EventType) -> Self {
        Self { routing_key, event_type }
    }

    #[must_use]
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Same routing key, different type.
    pub(crate) fn with_type(&self, event_type: EventType) -> Self {
        Self { routing_key: Arc::clone(&self.routing_key), event_type }
    }
}

impl fmt::Display for EventIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.event_type, self.routing_key)
    }
}

/// An event together with the routing key it is posted under.
#[derive(Debug, Clone)]
pub struct PostEnvelope {
    routing_key: Arc<str>,
    event: Arc<dyn Event>,
}

impl PostEnvelope {
    /// Creates an envelope for `event` under `routing_key`.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidEnvelope`] if `routing_key` is blank.
    ///
    /// # Examples
    /// ```rust
    /// use notice_bus::PostEnvelope;
    ///
    /// #[derive(Debug, notice_bus::Event)]
    /// struct Ping;
    ///
    /// let envelope = PostEnvelope::new("1", Ping).unwrap();
    /// assert_eq!(envelope.routing_key(), "1");
    /// assert!(PostEnvelope::new("", Ping).is_err());
    /// ```
    pub fn new(routing_key: impl Into<String>, event: impl Event) -> Result<Self, EventBusError> {
        Self::builder().routing_key(routing_key).event(event).build()
    }

    /// Starts an envelope whose fields are validated on [`PostEnvelopeBuilder::build`].
    pub fn builder() -> PostEnvelopeBuilder {
        PostEnvelopeBuilder::default()
    }

    #[must_use]
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    #[must_use]
    pub const fn event(&self) -> &Arc<dyn Event> {
        &self.event
    }

    /// The concrete identity of this post.
    #[must_use]
    pub fn identity(&self) -> EventIdentity {
        EventIdentity::from_parts(Arc::clone(&self.routing_key), self.event.event_type())
    }

    pub(crate) fn into_event(self) -> Arc<dyn Event> {
        self.event
    }
}

/// Builder for [`PostEnvelope`]; both fields are required.
#[must_use = "builders do nothing unless you call .build()"]
#[derive(Debug, Default)]
pub struct PostEnvelopeBuilder {
    routing_key: Option<String>,
    event: Option<Arc<dyn Event>>,
}

impl PostEnvelopeBuilder {
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn event(self, event: impl Event) -> Self {
        self.shared_event(Arc::new(event))
    }

    /// Sets an already shared payload.
    pub fn shared_event(mut self, event: Arc<dyn Event>) -> Self {
        self.event = Some(event);
        self
    }

    /// Validates and builds the envelope.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidEnvelope`] if the routing key is missing or blank,
    /// or if no payload was set.
    pub fn build(self) -> Result<PostEnvelope, EventBusError> {
        let routing_key = self.routing_key.ok_or_else(|| EventBusError::InvalidEnvelope {
            message: "routing key is required".into(),
            context: None,
        })?;
        let routing_key = validate_key(&routing_key)?;
        let event = self.event.ok_or_else(|| EventBusError::InvalidEnvelope {
            message: "payload is required".into(),
            context: Some(format!("routing key `{routing_key}`").into()),
        })?;
        Ok(PostEnvelope { routing_key: routing_key.into(), event })
    }
}

/// Wraps a payload nobody subscribed to.
///
/// Posted by the bus under [`UNROUTED_KEY`] so that catch-all handlers can observe
/// events that would otherwise be lost.
#[derive(Debug, Clone)]
pub struct UnroutedEvent {
    source: Arc<str>,
    routing_key: Arc<str>,
    event: Arc<dyn Event>,
}

impl UnroutedEvent {
    pub(crate) fn new(source: Arc<str>, envelope: PostEnvelope) -> Self {
        Self { source, routing_key: envelope.routing_key, event: envelope.event }
    }

    /// Identifier of the bus that could not deliver the event.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Routing key of the original post.
    #[must_use]
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// The undelivered payload.
    #[must_use]
    pub const fn event(&self) -> &Arc<dyn Event> {
        &self.event
    }
}

impl Event for UnroutedEvent {}

fn validate_key(routing_key: &str) -> Result<&str, EventBusError> {
    if routing_key.trim().is_empty() {
        return Err(EventBusError::InvalidEnvelope {
            message: "routing key must not be blank".into(),
            context: None,
        });
    }
    Ok(routing_key)
}
