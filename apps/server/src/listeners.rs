//! Demo listeners wired into the server's bus.

use notice_bus::{Event, EventBus, EventBusError, UnroutedEvent, listener};
use std::sync::Arc;
use tracing::{info, warn};

/// Posted by `POST /event/do`, routed by its own task id.
#[derive(Debug, Clone, PartialEq, Eq, Event)]
pub struct TaskEvent {
    pub task_id: String,
}

#[derive(Debug, Default)]
pub struct AService;

#[listener]
impl AService {
    #[subscribe(key = "1")]
    fn on_task(&self, event: &TaskEvent) {
        info!(listener = "AService", task_id = %event.task_id, "task received");
    }
}

#[derive(Debug, Default)]
pub struct CService;

#[listener]
impl CService {
    #[subscribe(key = "3")]
    fn on_task(&self, event: &TaskEvent) {
        info!(listener = "CService", task_id = %event.task_id, "task received");
    }
}

#[derive(Debug, Default)]
pub struct DService;

#[listener]
impl DService {
    #[subscribe(key = "4")]
    fn on_task(&self, event: &TaskEvent) {
        info!(listener = "DService", task_id = %event.task_id, "task received");
    }
}

/// Catch-all for posts nobody subscribed to.
#[derive(Debug, Default)]
pub struct UnroutedLogger;

#[listener]
impl UnroutedLogger {
    #[subscribe(key = "DEAD")]
    fn on_unrouted(&self, event: &UnroutedEvent) {
        warn!(
            bus = event.source(),
            routing_key = event.routing_key(),
            event = ?event.event(),
            "event had no subscribers"
        );
    }
}

/// Registers every demo listener on `bus`.
///
/// # Errors
/// Propagates [`EventBusError::InvalidHandler`] from a malformed declaration.
pub fn register_all(bus: &EventBus) -> Result<(), EventBusError> {
    bus.register(&Arc::new(AService))?;
    bus.register(&Arc::new(CService))?;
    bus.register(&Arc::new(DService))?;
    bus.register(&Arc::new(UnroutedLogger))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_keys_are_routed() {
        let bus = EventBus::new();
        register_all(&bus).unwrap();

        for key in ["1", "3", "4"] {
            bus.post_event(key, TaskEvent { task_id: key.to_owned() }).unwrap();
        }
        assert!(bus.post_event("2", TaskEvent { task_id: "2".to_owned() }).is_err());
    }
}
