//! Metrics collection utilities.
//!
//! Counts upstream traffic, challenges and refresh outcomes, and keeps a
//! latency window for average and p95 figures.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serializable view returned by `/metrics`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub upstream_requests: u64,
    pub upstream_errors: u64,
    pub challenges: u64,
    pub refresh_successes: u64,
    pub refresh_failures: u64,
    pub manual_captures: u64,
    pub last_status: Option<u16>,
    pub average_latency_ms: Option<u64>,
    pub p95_latency_ms: Option<u64>,
}

#[derive(Debug)]
struct MetricsState {
    started_at: DateTime<Utc>,
    upstream_requests: u64,
    upstream_errors: u64,
    challenges: u64,
    refresh_successes: u64,
    refresh_failures: u64,
    manual_captures: u64,
    last_status: Option<u16>,
    latencies: VecDeque<Duration>,
    max_window: usize,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            started_at: Utc::now(),
            upstream_requests: 0,
            upstream_errors: 0,
            challenges: 0,
            refresh_successes: 0,
            refresh_failures: 0,
            manual_captures: 0,
            last_status: None,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
        }
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let mut samples: Vec<_> = self.latencies.iter().cloned().collect();
        samples.sort_unstable();
        let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
        let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        let p95 = samples[p95_index];
        (Some(Duration::from_secs_f64(avg)), Some(p95))
    }
}

/// Thread-safe metrics collector used by the relay.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(128)
    }

    /// Collector keeping the last `window` latencies (at least 16).
    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    pub fn record_response(&self, status: u16, latency: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.upstream_requests += 1;
        guard.last_status = Some(status);
        if guard.latencies.len() == guard.max_window {
            guard.latencies.pop_front();
        }
        guard.latencies.push_back(latency);
    }

    pub fn record_error(&self) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.upstream_errors += 1;
    }

    pub fn record_challenge(&self) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.challenges += 1;
    }

    pub fn record_refresh(&self, success: bool) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        if success {
            guard.refresh_successes += 1;
        } else {
            guard.refresh_failures += 1;
        }
    }

    pub fn record_manual_capture(&self) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.manual_captures += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let (avg, p95) = guard.latency_stats();
        MetricsSnapshot {
            started_at: guard.started_at,
            upstream_requests: guard.upstream_requests,
            upstream_errors: guard.upstream_errors,
            challenges: guard.challenges,
            refresh_successes: guard.refresh_successes,
            refresh_failures: guard.refresh_failures,
            manual_captures: guard.manual_captures,
            last_status: guard.last_status,
            average_latency_ms: avg.map(|d| d.as_millis() as u64),
            p95_latency_ms: p95.map(|d| d.as_millis() as u64),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
