use crate::config::DispatchStrategy;
use crate::event::Event;
use crate::registry::Subscribers;
use crate::subscriber::Subscriber;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Pending posts and the draining flag, per dispatcher, for the current thread.
    static PER_THREAD: RefCell<FxHashMap<u64, ThreadQueue>> = RefCell::new(FxHashMap::default());
}

#[derive(Default)]
struct ThreadQueue {
    queue: VecDeque<(Arc<dyn Event>, Subscribers)>,
    dispatching: bool,
}

/// Decides when, and on which thread, matched subscribers receive an event.
#[derive(Debug)]
pub enum Dispatcher {
    /// Serialized per thread: events posted from inside a handler are queued and
    /// delivered after the current event, in post order, without recursion.
    PerThreadQueued(PerThreadQueuedDispatcher),
    /// Shared queue drained cooperatively by every posting thread.
    ConcurrentQueue(ConcurrentQueueDispatcher),
    /// Synchronous delivery on the calling thread, no queueing.
    Immediate,
}

impl Dispatcher {
    #[must_use]
    pub fn per_thread_queued() -> Self {
        Self::PerThreadQueued(PerThreadQueuedDispatcher::new())
    }

    #[must_use]
    pub fn concurrent_queue() -> Self {
        Self::ConcurrentQueue(ConcurrentQueueDispatcher::default())
    }

    #[must_use]
    pub const fn immediate() -> Self {
        Self::Immediate
    }

    #[must_use]
    pub const fn strategy(&self) -> DispatchStrategy {
        match self {
            Self::PerThreadQueued(_) => DispatchStrategy::PerThread,
            Self::ConcurrentQueue(_) => DispatchStrategy::Concurrent,
            Self::Immediate => DispatchStrategy::Immediate,
        }
    }

    pub(crate) fn dispatch(&self, event: Arc<dyn Event>, subscribers: Subscribers) {
        match self {
            Self::PerThreadQueued(dispatcher) => dispatcher.dispatch(event, subscribers),
            Self::ConcurrentQueue(dispatcher) => dispatcher.dispatch(event, subscribers),
            Self::Immediate => {
                for subscriber in subscribers {
                    subscriber.dispatch_event(Arc::clone(&event));
                }
            },
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::per_thread_queued()
    }
}

impl From<DispatchStrategy> for Dispatcher {
    fn from(strategy: DispatchStrategy) -> Self {
        match strategy {
            DispatchStrategy::PerThread => Self::per_thread_queued(),
            DispatchStrategy::Concurrent => Self::concurrent_queue(),
            DispatchStrategy::Immediate => Self::immediate(),
        }
    }
}

#[derive(Debug)]
pub struct PerThreadQueuedDispatcher {
    id: u64,
}

impl PerThreadQueuedDispatcher {
    fn new() -> Self {
        Self { id: NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed) }
    }

    fn dispatch(&self, event: Arc<dyn Event>, subscribers: Subscribers) {
        let first = PER_THREAD.with_borrow_mut(|state| {
            let state = state.entry(self.id).or_default();
            state.queue.push_back((event, subscribers));
            !std::mem::replace(&mut state.dispatching, true)
        });
        if !first {
            trace!(dispatcher = self.id, "Queued reentrant post");
            return;
        }

        let _reset = ResetOnExit(self.id);
        loop {
            // The RefCell borrow must end before handlers run; they may post again.
            let next = PER_THREAD.with_borrow_mut(|state| state.get_mut(&self.id)?.queue.pop_front());
            let Some((event, subscribers)) = next else { break };
            for subscriber in subscribers {
                subscriber.dispatch_event(Arc::clone(&event));
            }
        }
    }
}

/// Drops the thread's queue and flag when draining ends, including by unwinding.
struct ResetOnExit(u64);

impl Drop for ResetOnExit {
    fn drop(&mut self) {
        let _ = PER_THREAD.try_with(|state| state.borrow_mut().remove(&self.0));
    }
}

#[derive(Debug, Default)]
pub struct ConcurrentQueueDispatcher {
    queue: Mutex<VecDeque<(Arc<dyn Event>, Arc<Subscriber>)>>,
}

impl ConcurrentQueueDispatcher {
    fn dispatch(&self, event: Arc<dyn Event>, subscribers: Subscribers) {
        self.queue.lock().extend(subscribers.map(|subscriber| (Arc::clone(&event), subscriber)));
        loop {
            let next = self.queue.lock().pop_front();
            let Some((event, subscriber)) = next else { break };
            subscriber.dispatch_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::event::EventType;
    use crate::listener::{HandlerMethod, Listener};
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn test_strategy_round_trip() {
        for strategy in [DispatchStrategy::PerThread, DispatchStrategy::Concurrent, DispatchStrategy::Immediate] {
            assert_eq!(Dispatcher::from(strategy).strategy(), strategy);
        }
        assert_eq!(Dispatcher::default().strategy(), DispatchStrategy::PerThread);
    }

    #[test]
    fn test_per_thread_dispatchers_have_distinct_ids() {
        let (Dispatcher::PerThreadQueued(a), Dispatcher::PerThreadQueued(b)) =
            (Dispatcher::per_thread_queued(), Dispatcher::per_thread_queued())
        else {
            unreachable!();
        };
        assert_ne!(a.id, b.id);
    }

    #[derive(Debug)]
    struct Step(u32);
    impl Event for Step {}

    struct Chain {
        bus: EventBus,
        seen: parking_lot::Mutex<Vec<u32>>,
    }

    impl Listener for Chain {
        fn handlers() -> Vec<HandlerMethod<Self>> {
            vec![HandlerMethod::new::<Step, _>("on_step", |chain: &Self, step: &Step| {
                chain.seen.lock().push(step.0);
                if step.0 < 3 {
                    chain.bus.post_event("chain", Step(step.0 + 1))?;
                }
                Ok::<_, crate::EventBusError>(())
            })
            .routing_key("chain")]
        }
    }

    #[test]
    fn test_per_thread_state_is_cleared_after_drain() {
        let bus = EventBus::builder().dispatcher(Dispatcher::per_thread_queued()).build();
        let chain = Arc::new(Chain { bus: bus.clone(), seen: parking_lot::Mutex::default() });
        bus.register(&chain).unwrap();

        bus.post_event("chain", Step(0)).unwrap();

        assert_eq!(*chain.seen.lock(), [0, 1, 2, 3]);
        assert!(PER_THREAD.with_borrow(|state| state.is_empty()));
        bus.unregister(&chain).unwrap();
    }

    #[test]
    fn test_concurrent_queue_is_drained() {
        let bus = EventBus::builder().dispatcher(Dispatcher::concurrent_queue()).build();
        let chain = Arc::new(Chain { bus: bus.clone(), seen: parking_lot::Mutex::default() });
        bus.register(&chain).unwrap();

        bus.post_event("chain", Step(0)).unwrap();

        let mut seen = chain.seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, [0, 1, 2, 3]);
        bus.unregister(&chain).unwrap();
    }

    /// Claims to accept `Step` but never recognizes the payload.
    struct Mismatched;

    impl Listener for Mismatched {
        fn handlers() -> Vec<HandlerMethod<Self>> {
            vec![HandlerMethod::raw("on_step", vec![EventType::of::<Step>()], |_, _| None).routing_key("broken")]
        }
    }

    #[test]
    fn test_per_thread_state_is_cleared_when_unwinding() {
        let bus = EventBus::builder().dispatcher(Dispatcher::per_thread_queued()).build();
        let chain = Arc::new(Chain { bus: bus.clone(), seen: parking_lot::Mutex::default() });
        bus.register(&chain).unwrap();
        bus.register(&Arc::new(Mismatched)).unwrap();

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| bus.post_event("broken", Step(0))));
        assert!(unwound.is_err());
        assert!(PER_THREAD.with_borrow(|state| state.is_empty()));

        bus.post_event("chain", Step(0)).unwrap();
        assert_eq!(*chain.seen.lock(), [0, 1, 2, 3]);
        bus.unregister(&chain).unwrap();
    }
}
