use crate::error::{EventBusError, EventBusErrorExt};
use std::fmt;
use tokio::runtime::Handle;

/// Unit of work handed to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Execution context that runs subscriber invocations.
pub trait Executor: Send + Sync + fmt::Debug {
    fn execute(&self, task: Task);
}

/// Runs every task inline on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    #[inline]
    fn execute(&self, task: Task) {
        task();
    }
}

/// Hands tasks to the blocking pool of a tokio runtime.
///
/// Handlers are synchronous code, so they go through `spawn_blocking` rather than
/// occupying async worker threads.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Captures the runtime the caller is running on.
    ///
    /// # Errors
    /// Returns [`EventBusError::Runtime`] when called outside of a tokio runtime.
    pub fn current() -> Result<Self, EventBusError> {
        Handle::try_current().context("TokioExecutor requires a running tokio runtime").map(Self::new)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        // Detached: completion is observed through the handler's own side effects.
        drop(self.handle.spawn_blocking(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_direct_executor_runs_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        DirectExecutor.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tokio_executor_requires_runtime() {
        assert!(matches!(TokioExecutor::current(), Err(EventBusError::Runtime { .. })));
    }

    #[tokio::test]
    async fn test_tokio_executor_runs_on_blocking_pool() {
        let executor = TokioExecutor::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        executor.execute(Box::new(move || {
            let _ = tx.send(std::thread::current().id());
        }));

        let worker = rx.await.unwrap();
        assert_ne!(worker, std::thread::current().id());
    }
}
