use crate::bus::EventBusInner;
use crate::error::EventBusError;
use crate::event::{EventIdentity, PostEnvelope};
use crate::executor::Executor;
use crate::listener::{HandlerMethod, Listener};
use crate::subscriber::{Subscriber, SubscriberKey};
use fxhash::FxHashMap;
use moka::sync::Cache;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Immutable subscriber set of one identity. Replaced wholesale on every change.
type Group = Arc<[Arc<Subscriber>]>;

type Declarations<L> = Arc<Vec<HandlerMethod<L>>>;

/// Subscription map of one bus.
///
/// Readers take a snapshot of the matching groups and iterate it without holding
/// any lock, so an in-flight dispatch never observes a later register/unregister.
pub(crate) struct SubscriberRegistry {
    bus: Weak<EventBusInner>,
    executor: Arc<dyn Executor>,
    subscribers: RwLock<FxHashMap<EventIdentity, Group>>,
    hierarchy: Cache<EventIdentity, Arc<[EventIdentity]>>,
    declarations: RwLock<FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl SubscriberRegistry {
    pub(crate) fn new(bus: Weak<EventBusInner>, executor: Arc<dyn Executor>, hierarchy_capacity: u64) -> Self {
        Self {
            bus,
            executor,
            subscribers: RwLock::new(FxHashMap::default()),
            hierarchy: Cache::new(hierarchy_capacity),
            declarations: RwLock::new(FxHashMap::default()),
        }
    }

    /// Adds one subscriber per handler of `listener`, all under a single write lock.
    pub(crate) fn register<L: Listener>(&self, listener: &Arc<L>) -> Result<(), EventBusError> {
        let declarations = self.declarations::<L>()?;

        let mut grouped: FxHashMap<EventIdentity, Vec<Arc<Subscriber>>> = FxHashMap::default();
        for method in declarations.iter() {
            let identity = identity_of(method);
            let subscriber = Subscriber::new(
                Weak::clone(&self.bus),
                listener,
                method,
                identity.event_type(),
                Arc::clone(&self.executor),
            );
            grouped.entry(identity).or_default().push(Arc::new(subscriber));
        }

        let mut subscribers = self.subscribers.write();
        for (identity, added) in grouped {
            trace!(%identity, count = added.len(), "Adding subscribers");
            let current = subscribers.get(&identity).map_or(&[][..], |group| &group[..]);
            let mut next = current.to_vec();
            for subscriber in added {
                if !next.contains(&subscriber) {
                    next.push(subscriber);
                }
            }
            subscribers.insert(identity, next.into());
        }
        Ok(())
    }

    /// Removes every subscriber `register` added for `listener`.
    ///
    /// All groups are checked before anything is removed, so a failed call leaves the
    /// registry untouched. A listener type without handlers is never registered and
    /// always fails.
    pub(crate) fn unregister<L: Listener>(&self, listener: &Arc<L>) -> Result<(), EventBusError> {
        let declarations = self.declarations::<L>()?;
        if declarations.is_empty() {
            return Err(EventBusError::NotRegistered {
                message: "listener declares no event subscribers".into(),
                context: Some(format!("listener {}", std::any::type_name::<L>()).into()),
            });
        }

        let mut grouped: FxHashMap<EventIdentity, Vec<SubscriberKey>> = FxHashMap::default();
        for method in declarations.iter() {
            grouped.entry(identity_of(method)).or_default().push(SubscriberKey::of(listener, method.name()));
        }

        let mut subscribers = self.subscribers.write();
        for (identity, keys) in &grouped {
            let registered = subscribers.get(identity).is_some_and(|group| {
                keys.iter().all(|key| group.iter().any(|subscriber| subscriber.key() == *key))
            });
            if !registered {
                return Err(EventBusError::NotRegistered {
                    message: format!("missing event subscriber for {identity}").into(),
                    context: Some(format!("listener {}", std::any::type_name::<L>()).into()),
                });
            }
        }

        for (identity, keys) in grouped {
            let Some(group) = subscribers.get(&identity) else { continue };
            let remaining: Vec<_> =
                group.iter().filter(|subscriber| !keys.contains(&subscriber.key())).cloned().collect();
            trace!(%identity, remaining = remaining.len(), "Removing subscribers");
            if remaining.is_empty() {
                subscribers.remove(&identity);
            } else {
                subscribers.insert(identity, remaining.into());
            }
        }
        Ok(())
    }

    /// Snapshot of every subscriber matching the envelope's identity or any of its
    /// ancestor identities.
    pub(crate) fn get_subscribers(&self, envelope: &PostEnvelope) -> Subscribers {
        let identities = self.flatten_hierarchy(&envelope.identity());
        let subscribers = self.subscribers.read();
        let groups = identities.iter().filter_map(|identity| subscribers.get(identity).cloned()).collect();
        Subscribers::new(groups)
    }

    /// The identity itself plus one identity per ancestor type, sharing its routing key.
    pub(crate) fn flatten_hierarchy(&self, identity: &EventIdentity) -> Arc<[EventIdentity]> {
        self.hierarchy.get_with_by_ref(identity, || {
            let flattened: Arc<[EventIdentity]> =
                identity.event_type().ancestors().into_iter().map(|ty| identity.with_type(ty)).collect();
            trace!(%identity, count = flattened.len(), "Caching event hierarchy");
            flattened
        })
    }

    /// Handler declarations of `L`, validated and cached per listener type.
    fn declarations<L: Listener>(&self) -> Result<Declarations<L>, EventBusError> {
        let key = TypeId::of::<L>();
        let cached = self.declarations.read().get(&key).cloned();
        if let Some(declarations) = cached.and_then(|any| any.downcast::<Vec<HandlerMethod<L>>>().ok()) {
            return Ok(declarations);
        }

        let handlers = L::handlers();
        for method in &handlers {
            validate::<L>(method)?;
        }
        debug!(
            listener = std::any::type_name::<L>(),
            handlers = handlers.len(),
            "Caching listener declarations"
        );

        let declarations = Arc::new(handlers);
        self.declarations.write().insert(key, Arc::clone(&declarations) as Arc<dyn Any + Send + Sync>);
        Ok(declarations)
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("identities", &self.subscribers.read().len())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

fn identity_of<L>(method: &HandlerMethod<L>) -> EventIdentity {
    EventIdentity::from_parts(method.key().into(), method.params()[0])
}

fn validate<L>(method: &HandlerMethod<L>) -> Result<(), EventBusError> {
    let params = method.params().len();
    if params != 1 {
        return Err(EventBusError::InvalidHandler {
            message: format!(
                "method `{}` has {params} parameters; subscriber methods must have exactly 1 parameter",
                method.name()
            )
            .into(),
            context: Some(std::any::type_name::<L>().into()),
        });
    }
    if method.key().trim().is_empty() {
        return Err(EventBusError::InvalidHandler {
            message: format!("method `{}` declares a blank routing key", method.name()).into(),
            context: Some(std::any::type_name::<L>().into()),
        });
    }
    Ok(())
}

/// Lazily concatenated snapshot of the subscriber groups matched by one post.
#[derive(Debug, Default)]
pub struct Subscribers {
    groups: Vec<Group>,
    group: usize,
    index: usize,
}

impl Subscribers {
    fn new(groups: Vec<Group>) -> Self {
        Self { groups, group: 0, index: 0 }
    }

    /// `true` when no subscriber is left to yield.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of subscribers left to yield.
    #[must_use]
    pub fn len(&self) -> usize {
        let total: usize = self.groups.iter().skip(self.group).map(|group| group.len()).sum();
        total - self.index
    }
}

impl Iterator for Subscribers {
    type Item = Arc<Subscriber>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(group) = self.groups.get(self.group) {
            if let Some(subscriber) = group.get(self.index) {
                self.index += 1;
                return Some(Arc::clone(subscriber));
            }
            self.group += 1;
            self.index = 0;
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.len();
        (len, Some(len))
    }
}

impl ExactSizeIterator for Subscribers {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventType};
    use crate::executor::DirectExecutor;
    use crate::listener::HandlerResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Base;
    impl Event for Base {}

    #[derive(Debug)]
    struct Derived {
        base: Base,
    }
    impl Event for Derived {
        fn supertypes() -> Vec<EventType> {
            vec![EventType::of::<Base>()]
        }

        fn upcast(&self, target: TypeId) -> Option<&dyn Any> {
            (target == TypeId::of::<Base>()).then_some(&self.base as &dyn Any)
        }
    }

    struct Audit;

    impl Listener for Audit {
        fn handlers() -> Vec<HandlerMethod<Self>> {
            vec![
                HandlerMethod::new::<Base, _>("on_base", |_, _| ()).routing_key("1"),
                HandlerMethod::new::<Derived, _>("on_derived", |_, _| ()).routing_key("1"),
                HandlerMethod::new::<Base, _>("on_other_key", |_, _| ()).routing_key("2"),
            ]
        }
    }

    struct TwoParams;

    impl Listener for TwoParams {
        fn handlers() -> Vec<HandlerMethod<Self>> {
            vec![HandlerMethod::raw(
                "on_pair",
                vec![EventType::of::<Base>(), EventType::of::<Derived>()],
                |_, _| -> Option<HandlerResult> { Some(Ok(())) },
            )]
        }
    }

    struct BlankKey;

    impl Listener for BlankKey {
        fn handlers() -> Vec<HandlerMethod<Self>> {
            vec![HandlerMethod::new::<Base, _>("on_base", |_, _| ()).routing_key(" ")]
        }
    }

    struct Silent;

    impl Listener for Silent {
        fn handlers() -> Vec<HandlerMethod<Self>> {
            Vec::new()
        }
    }

    static COUNTED_DISCOVERIES: AtomicUsize = AtomicUsize::new(0);

    struct Counted;

    impl Listener for Counted {
        fn handlers() -> Vec<HandlerMethod<Self>> {
            COUNTED_DISCOVERIES.fetch_add(1, Ordering::SeqCst);
            vec![HandlerMethod::new::<Base, _>("on_base", |_, _| ()).routing_key("1")]
        }
    }

    fn registry() -> SubscriberRegistry {
        SubscriberRegistry::new(Weak::new(), Arc::new(DirectExecutor), 64)
    }

    fn matched(registry: &SubscriberRegistry, key: &str, event: impl Event) -> Vec<&'static str> {
        let envelope = PostEnvelope::new(key, event).unwrap();
        let mut methods: Vec<_> = registry.get_subscribers(&envelope).map(|s| s.method()).collect();
        methods.sort_unstable();
        methods
    }

    #[test]
    fn test_hierarchy_expansion_matches_ancestors() {
        let registry = registry();
        registry.register(&Arc::new(Audit)).unwrap();

        assert_eq!(matched(&registry, "1", Derived { base: Base }), ["on_base", "on_derived"]);
        assert_eq!(matched(&registry, "1", Base), ["on_base"]);
        assert_eq!(matched(&registry, "2", Derived { base: Base }), ["on_other_key"]);
        assert!(matched(&registry, "3", Base).is_empty());
    }

    #[test]
    fn test_flattened_hierarchy_shares_routing_key() {
        let registry = registry();
        let identity = EventIdentity::new("1", EventType::of::<Derived>()).unwrap();

        let flattened = registry.flatten_hierarchy(&identity);
        assert_eq!(flattened.len(), 2);
        assert!(flattened.iter().all(|id| id.routing_key() == "1"));
        assert!(Arc::ptr_eq(&flattened, &registry.flatten_hierarchy(&identity)));
    }

    #[test]
    fn test_registering_twice_is_idempotent() {
        let registry = registry();
        let audit = Arc::new(Audit);
        registry.register(&audit).unwrap();
        registry.register(&audit).unwrap();

        assert_eq!(matched(&registry, "1", Base), ["on_base"]);
    }

    #[test]
    fn test_distinct_instances_subscribe_separately() {
        let registry = registry();
        registry.register(&Arc::new(Audit)).unwrap();
        registry.register(&Arc::new(Audit)).unwrap();

        assert_eq!(matched(&registry, "1", Base), ["on_base", "on_base"]);
    }

    #[test]
    fn test_unregister_removes_everything() {
        let registry = registry();
        let audit = Arc::new(Audit);
        registry.register(&audit).unwrap();
        registry.unregister(&audit).unwrap();

        assert!(matched(&registry, "1", Derived { base: Base }).is_empty());
        assert!(registry.subscribers.read().is_empty());
        assert!(matches!(registry.unregister(&audit), Err(EventBusError::NotRegistered { .. })));
    }

    #[test]
    fn test_unregister_unknown_leaves_others_intact() {
        let registry = registry();
        let registered = Arc::new(Audit);
        registry.register(&registered).unwrap();

        let err = registry.unregister(&Arc::new(Audit)).unwrap_err();
        assert!(err.to_string().contains("Audit"));
        assert_eq!(matched(&registry, "1", Base), ["on_base"]);
    }

    #[test]
    fn test_malformed_declarations_are_rejected() {
        let registry = registry();

        let err = registry.register(&Arc::new(TwoParams)).unwrap_err();
        assert!(matches!(err, EventBusError::InvalidHandler { .. }));
        assert!(err.to_string().contains("on_pair"));

        let err = registry.register(&Arc::new(BlankKey)).unwrap_err();
        assert!(matches!(err, EventBusError::InvalidHandler { .. }));
        assert!(registry.subscribers.read().is_empty());
    }

    #[test]
    fn test_snapshot_ignores_later_changes() {
        let registry = registry();
        let audit = Arc::new(Audit);
        registry.register(&audit).unwrap();

        let envelope = PostEnvelope::new("1", Base).unwrap();
        let snapshot = registry.get_subscribers(&envelope);
        registry.unregister(&audit).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.count(), 1);
        assert!(registry.get_subscribers(&envelope).is_empty());
    }

    #[test]
    fn test_declarations_are_discovered_once_per_type() {
        let registry = registry();
        let first = Arc::new(Counted);
        registry.register(&first).unwrap();
        registry.register(&Arc::new(Counted)).unwrap();
        registry.unregister(&first).unwrap();

        assert_eq!(COUNTED_DISCOVERIES.load(Ordering::SeqCst), 1);
        assert_eq!(matched(&registry, "1", Base), ["on_base"]);
    }

    #[test]
    fn test_unregister_without_handlers_fails() {
        let registry = registry();
        let silent = Arc::new(Silent);
        registry.register(&silent).unwrap();

        let err = registry.unregister(&silent).unwrap_err();
        assert!(matches!(err, EventBusError::NotRegistered { .. }));
        assert!(err.to_string().contains("Silent"));
    }
}
