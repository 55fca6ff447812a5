#![allow(dead_code)]

use notice_bus::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Event)]
pub struct TaskEvent {
    pub task_id: String,
}

impl TaskEvent {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self { task_id: task_id.into() }
    }
}

#[derive(Debug, Event)]
pub struct BaseEvent {
    pub origin: &'static str,
}

#[derive(Debug, Event)]
pub struct SubEvent {
    #[event(extends)]
    pub base: BaseEvent,
    pub detail: u32,
}

/// Ordered record of what handlers observed.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Subscribes to `TaskEvent` on key "1".
#[derive(Debug)]
pub struct TaskService {
    pub name: &'static str,
    pub journal: Arc<Journal>,
}

#[listener]
impl TaskService {
    #[subscribe(key = "1")]
    fn on_task(&self, event: &TaskEvent) {
        self.journal.push(format!("{}:{}", self.name, event.task_id));
    }
}

/// Fails on every `TaskEvent` it receives on key "1".
#[derive(Debug)]
pub struct FailingService;

#[listener]
impl FailingService {
    #[subscribe(key = "1")]
    fn on_task(&self, event: &TaskEvent) -> Result<(), String> {
        Err(format!("cannot process {}", event.task_id))
    }
}

/// Panics on every `TaskEvent` it receives on key "1".
#[derive(Debug)]
pub struct PanickingService;

#[listener]
impl PanickingService {
    #[subscribe(key = "1")]
    fn on_task(&self, _event: &TaskEvent) -> Result<(), HandlerError> {
        panic!("handler exploded")
    }
}

/// Subscribes to `BaseEvent` on key "1".
#[derive(Debug)]
pub struct BaseAudit {
    pub journal: Arc<Journal>,
}

#[listener]
impl BaseAudit {
    #[subscribe(key = "1")]
    fn on_base(&self, event: &BaseEvent) {
        self.journal.push(format!("base:{}", event.origin));
    }
}

/// Catch-all for events nobody subscribed to.
#[derive(Debug)]
pub struct DeadLetters {
    pub journal: Arc<Journal>,
}

#[listener]
impl DeadLetters {
    #[subscribe(key = "DEAD")]
    fn on_unrouted(&self, event: &UnroutedEvent) {
        let task = event.event().view::<TaskEvent>().map_or("?", |task| task.task_id.as_str());
        self.journal.push(format!("{}:{}:{}", event.source(), event.routing_key(), task));
    }
}
