use serde::Deserialize;

/// Default number of memoized event hierarchies per bus.
pub const DEFAULT_HIERARCHY_CACHE_CAPACITY: u64 = 10_000;

/// Declarative bus settings, usually a section of the application configuration.
///
/// Every field has a default, so an empty section yields the same bus as
/// [`EventBus::new`](crate::EventBus::new).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub identifier: String,
    pub dispatch: DispatchStrategy,
    pub executor: ExecutorKind,
    pub hierarchy_cache_capacity: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            identifier: crate::bus::DEFAULT_IDENTIFIER.to_owned(),
            dispatch: DispatchStrategy::default(),
            executor: ExecutorKind::default(),
            hierarchy_cache_capacity: DEFAULT_HIERARCHY_CACHE_CAPACITY,
        }
    }
}

/// Names the [`Dispatcher`](crate::Dispatcher) variant a bus is built with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategy {
    #[default]
    PerThread,
    Concurrent,
    Immediate,
}

/// Names the [`Executor`](crate::Executor) handlers run on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    #[default]
    Direct,
    Tokio,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_section_uses_defaults() {
        let config: EventBusConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EventBusConfig::default());
        assert_eq!(config.identifier, "default");
        assert_eq!(config.dispatch, DispatchStrategy::PerThread);
        assert_eq!(config.executor, ExecutorKind::Direct);
    }

    #[test]
    fn test_strategies_use_snake_case() {
        let config: EventBusConfig = serde_json::from_str(
            r#"{ "identifier": "orders", "dispatch": "concurrent", "executor": "tokio", "hierarchy_cache_capacity": 16 }"#,
        )
        .unwrap();

        assert_eq!(config.identifier, "orders");
        assert_eq!(config.dispatch, DispatchStrategy::Concurrent);
        assert_eq!(config.executor, ExecutorKind::Tokio);
        assert_eq!(config.hierarchy_cache_capacity, 16);

        assert!(serde_json::from_str::<EventBusConfig>(r#"{ "dispatch": "async" }"#).is_err());
    }
}
