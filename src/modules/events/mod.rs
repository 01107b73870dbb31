//! Event system for the relay.
//!
//! Provides hooks for metrics, logging, and custom reactions around upstream
//! fetches, challenge detection, refreshes and manual sessions.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::metrics::MetricsCollector;
use crate::external_deps::browser::SessionKind;

/// Completed upstream fetch.
#[derive(Debug, Clone)]
pub struct UpstreamEvent {
    pub url: Url,
    pub status: u16,
    pub latency: Duration,
    /// 1 for the first fetch, 2 for the post-refresh retry.
    pub attempt: u8,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChallengeEvent {
    pub url: Url,
    pub trigger: String,
    pub indicators: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RefreshEvent {
    pub domain: String,
    pub kind: SessionKind,
    pub success: bool,
    pub reason: Option<String>,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualAction {
    Started,
    Captured,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ManualEvent {
    pub action: ManualAction,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub domain: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RelayEvent {
    Upstream(UpstreamEvent),
    Challenge(ChallengeEvent),
    Refresh(RefreshEvent),
    Manual(ManualEvent),
    Error(ErrorEvent),
}

impl RelayEvent {
    pub fn manual(action: ManualAction) -> Self {
        RelayEvent::Manual(ManualEvent {
            action,
            timestamp: Utc::now(),
        })
    }

    pub fn error(domain: impl Into<String>, error: impl ToString) -> Self {
        RelayEvent::Error(ErrorEvent {
            domain: domain.into(),
            error: error.to_string(),
            timestamp: Utc::now(),
        })
    }
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &RelayEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: RelayEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &RelayEvent) {
        match event {
            RelayEvent::Upstream(upstream) => {
                log::debug!(
                    "<- GET {} -> {} ({:.2}s, attempt {})",
                    upstream.url,
                    upstream.status,
                    upstream.latency.as_secs_f64(),
                    upstream.attempt
                );
            }
            RelayEvent::Challenge(challenge) => {
                log::info!(
                    "challenge {} ({}) indicators={:?}",
                    challenge.url,
                    challenge.trigger,
                    challenge.indicators
                );
            }
            RelayEvent::Refresh(refresh) if refresh.success => {
                log::info!(
                    "refresh {} via {} browser ok ({:.2}s)",
                    refresh.domain,
                    refresh.kind,
                    refresh.duration.as_secs_f64()
                );
            }
            RelayEvent::Refresh(refresh) => {
                log::warn!(
                    "[auto] refresh failed {} -> {}",
                    refresh.domain,
                    refresh.reason.as_deref().unwrap_or("unknown")
                );
            }
            RelayEvent::Manual(manual) => match manual.action {
                ManualAction::Started => log::info!("[manual] polling started"),
                ManualAction::Captured => log::info!("[manual] cf_clearance captured via polling"),
                ManualAction::Expired => log::info!("[manual] polling window elapsed"),
                ManualAction::Cancelled => log::debug!("[manual] polling cancelled"),
            },
            RelayEvent::Error(error) => {
                log::warn!("warning {} -> {}", error.domain, error.error);
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &RelayEvent) {
        match event {
            RelayEvent::Upstream(upstream) => {
                self.metrics.record_response(upstream.status, upstream.latency);
            }
            RelayEvent::Challenge(_) => self.metrics.record_challenge(),
            RelayEvent::Refresh(refresh) => self.metrics.record_refresh(refresh.success),
            RelayEvent::Manual(manual) if manual.action == ManualAction::Captured => {
                self.metrics.record_manual_capture();
            }
            RelayEvent::Error(_) => self.metrics.record_error(),
            _ => {}
        }
    }
}
