//! Credential refresh through an automated browser.
//!
//! A refresh renders the upstream in a browser, waits for the challenge to
//! settle and copies the resulting cookies into the [`CredentialStore`].
//! Refreshes for the same upstream host are collapsed: concurrent callers
//! share one execution and its outcome.

pub mod single_flight;

pub use single_flight::{FlightAborted, SingleFlight};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use url::Url;

use crate::challenges::core::{join_upstream, normalize_path};
use crate::credentials::{CredentialError, CredentialStore};
use crate::external_deps::browser::{BrowserError, BrowserSessions, PageGuard, SessionKind};
use crate::modules::events::{EventDispatcher, RefreshEvent, RelayEvent};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no {cookie} cookie after rendering")]
    NoCredentialFound { cookie: String },
    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),
    #[error("browser failed to start: {0}")]
    SessionLaunch(String),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("refresh task aborted: {0}")]
    Aborted(String),
}

impl From<BrowserError> for RefreshError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::NavigationTimeout(timeout) => RefreshError::NavigationTimeout(timeout),
            BrowserError::Launch { .. } => RefreshError::SessionLaunch(err.to_string()),
            other => RefreshError::Browser(other.to_string()),
        }
    }
}

impl From<FlightAborted> for RefreshError {
    fn from(err: FlightAborted) -> Self {
        RefreshError::Aborted(err.0)
    }
}

impl From<CredentialError> for RefreshError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::MissingCookie(cookie) => RefreshError::NoCredentialFound { cookie },
        }
    }
}

/// Timing knobs for a refresh.
#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    /// Pause between load and the cookie read.
    pub settle_delay: Duration,
    /// Navigation bound.
    pub navigation_timeout: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(8_000),
            navigation_timeout: Duration::from_millis(60_000),
        }
    }
}

/// Drives single-flight refreshes against one upstream.
pub struct RefreshCoordinator {
    sessions: Arc<BrowserSessions>,
    credentials: CredentialStore,
    upstream: Url,
    key: String,
    settings: RefreshSettings,
    flight: SingleFlight<String, Result<(), RefreshError>>,
    events: Arc<EventDispatcher>,
}

impl RefreshCoordinator {
    pub fn new(
        sessions: Arc<BrowserSessions>,
        credentials: CredentialStore,
        upstream: Url,
        settings: RefreshSettings,
        events: Arc<EventDispatcher>,
    ) -> Self {
        let key = upstream.host_str().unwrap_or_default().to_string();
        Self {
            sessions,
            credentials,
            upstream,
            key,
            settings,
            flight: SingleFlight::new(),
            events,
        }
    }

    /// Refresh the credential by rendering `path` in a `kind` browser.
    ///
    /// Joins a pending refresh when one exists. The work runs on its own task,
    /// so dropping this future never cancels the refresh, and its slot is
    /// cleared when it ends even if every caller has gone away.
    pub async fn refresh(&self, kind: SessionKind, path: &str) -> Result<(), RefreshError> {
        let target = join_upstream(&self.upstream, &normalize_path(Some(path)))
            .map_err(|err| RefreshError::Browser(err.to_string()))?;

        let job = RefreshJob {
            sessions: Arc::clone(&self.sessions),
            credentials: self.credentials.clone(),
            cookie_url: self.upstream.clone(),
            target,
            settings: self.settings,
        };
        let events = Arc::clone(&self.events);
        let domain = self.key.clone();

        self.flight
            .run(self.key.clone(), move || async move {
                let started = Instant::now();
                let outcome = job.run(kind).await;
                events.dispatch(RelayEvent::Refresh(RefreshEvent {
                    domain,
                    kind,
                    success: outcome.is_ok(),
                    reason: outcome.as_ref().err().map(ToString::to_string),
                    duration: started.elapsed(),
                    timestamp: Utc::now(),
                }));
                outcome
            })
            .await?
    }

    pub fn is_refreshing(&self) -> bool {
        self.flight.is_inflight(&self.key)
    }
}

struct RefreshJob {
    sessions: Arc<BrowserSessions>,
    credentials: CredentialStore,
    cookie_url: Url,
    target: Url,
    settings: RefreshSettings,
}

impl RefreshJob {
    async fn run(self, kind: SessionKind) -> Result<(), RefreshError> {
        let session = self.sessions.ensure(kind).await?;
        let page = PageGuard::new(session.new_page().await?);

        log::debug!("refresh navigating {} via {kind} browser", self.target);
        let outcome = self.render(&page).await;
        page.release().await;
        outcome
    }

    async fn render(&self, page: &PageGuard) -> Result<(), RefreshError> {
        page.navigate(&self.target, self.settings.navigation_timeout)
            .await?;
        tokio::time::sleep(self.settings.settle_delay).await;
        let cookies = page.cookies(&self.cookie_url).await?;
        self.credentials.set(&cookies)?;
        Ok(())
    }
}
