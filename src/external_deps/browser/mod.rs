//! Automated browser integration.
//!
//! The relay never solves challenges itself; it lets a real browser render the
//! upstream and reads the cookies the browser ends up with. This module defines
//! the narrow interface the refresher and the manual poller rely on, the
//! session slots that reuse a connected browser per kind, and a page guard
//! that always releases pages.

mod chromium;
mod stealth;

#[cfg(test)]
pub(crate) mod fake;

pub use chromium::ChromiumLauncher;
pub use stealth::{PageProfile, STEALTH_SCRIPT};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::challenges::core::SessionCookie;

/// Which browser a flow needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Headless browser owned by the refresher.
    Headless,
    /// Headed browser exposed over remote debugging for a human operator.
    Interactive,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Headless => f.write_str("headless"),
            SessionKind::Interactive => f.write_str("interactive"),
        }
    }
}

/// Errors surfaced by browser integrations.
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    #[error("failed to launch {kind} browser: {reason}")]
    Launch { kind: SessionKind, reason: String },
    #[error("browser session disconnected")]
    Disconnected,
    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

/// Convenience alias for browser results.
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Starts fresh browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, kind: SessionKind) -> BrowserResult<Arc<dyn BrowserSession>>;
}

/// A running browser.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn kind(&self) -> SessionKind;

    fn is_connected(&self) -> bool;

    /// DevTools websocket endpoint.
    fn ws_endpoint(&self) -> String;

    /// Open a page with the user agent, viewport, headers and document
    /// patches already applied.
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>>;

    /// Every page currently open, including ones opened by a human.
    async fn pages(&self) -> BrowserResult<Vec<Box<dyn BrowserPage>>>;

    /// Best-effort close of the whole browser.
    async fn shutdown(&self);
}

/// A single tab.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait for the document to load, bounded by `timeout`.
    async fn navigate(&self, url: &Url, timeout: Duration) -> BrowserResult<()>;

    /// Cookies the browser would send to `url`.
    async fn cookies(&self, url: &Url) -> BrowserResult<Vec<SessionCookie>>;

    /// Best-effort close; errors are swallowed.
    async fn close(self: Box<Self>);
}

/// Owns a page and guarantees it is closed.
///
/// Call [`PageGuard::release`] on every normal path. A guard dropped without
/// release (task abort, timeout, panic) spawns the close on the current
/// runtime instead.
pub struct PageGuard {
    page: Option<Box<dyn BrowserPage>>,
}

impl PageGuard {
    pub fn new(page: Box<dyn BrowserPage>) -> Self {
        Self { page: Some(page) }
    }

    pub async fn release(mut self) {
        if let Some(page) = self.page.take() {
            page.close().await;
        }
    }
}

impl std::ops::Deref for PageGuard {
    type Target = dyn BrowserPage;

    fn deref(&self) -> &Self::Target {
        // Only `release` and `drop` take the page, and both consume the guard.
        match self.page.as_deref() {
            Some(page) => page,
            None => unreachable!("page guard used after release"),
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take()
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            handle.spawn(async move {
                page.close().await;
            });
        }
    }
}

/// One reusable browser per [`SessionKind`].
pub struct BrowserSessions {
    launcher: Arc<dyn BrowserLauncher>,
    headless: Mutex<Option<Arc<dyn BrowserSession>>>,
    interactive: Mutex<Option<Arc<dyn BrowserSession>>>,
}

impl BrowserSessions {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            headless: Mutex::new(None),
            interactive: Mutex::new(None),
        }
    }

    fn slot(&self, kind: SessionKind) -> &Mutex<Option<Arc<dyn BrowserSession>>> {
        match kind {
            SessionKind::Headless => &self.headless,
            SessionKind::Interactive => &self.interactive,
        }
    }

    /// Return the connected session of `kind`, launching one if needed.
    ///
    /// The slot lock is held across the launch so concurrent callers share a
    /// single browser.
    pub async fn ensure(&self, kind: SessionKind) -> BrowserResult<Arc<dyn BrowserSession>> {
        let mut slot = self.slot(kind).lock().await;
        if let Some(session) = slot.as_ref()
            && session.is_connected()
        {
            return Ok(session.clone());
        }

        if let Some(stale) = slot.take() {
            log::debug!("{kind} browser disconnected; relaunching");
            stale.shutdown().await;
        }

        let session = self.launcher.launch(kind).await?;
        log::info!("{kind} browser launched at {}", session.ws_endpoint());
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Connected session of `kind`, without launching.
    pub async fn current(&self, kind: SessionKind) -> Option<Arc<dyn BrowserSession>> {
        self.slot(kind)
            .lock()
            .await
            .as_ref()
            .filter(|session| session.is_connected())
            .cloned()
    }

    /// Close both browsers.
    pub async fn shutdown_all(&self) {
        for kind in [SessionKind::Headless, SessionKind::Interactive] {
            if let Some(session) = self.slot(kind).lock().await.take() {
                log::info!("closing {kind} browser");
                session.shutdown().await;
            }
        }
    }
}
