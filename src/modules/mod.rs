//! Cross-cutting services module
//!
//! Observability around the relay: structured events and counters.

pub mod events;
pub mod metrics;

// Re-export commonly used types
pub use events::{
    ChallengeEvent, ErrorEvent, EventDispatcher, EventHandler, LoggingHandler, ManualAction,
    ManualEvent, MetricsHandler, RefreshEvent, RelayEvent, UpstreamEvent,
};
pub use metrics::{MetricsCollector, MetricsSnapshot};
