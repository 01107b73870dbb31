//! In-memory browser used by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{
    BrowserError, BrowserLauncher, BrowserPage, BrowserResult, BrowserSession, SessionKind,
};
use crate::challenges::core::SessionCookie;

#[derive(Default)]
pub(crate) struct FakeState {
    pub cookies: Mutex<Vec<SessionCookie>>,
    pub navigation_delay: Mutex<Duration>,
    pub fail_launch: AtomicBool,
    pub open_pages: AtomicUsize,
    pub launches: AtomicUsize,
    pub navigations: AtomicUsize,
    pub cookie_reads: AtomicUsize,
    /// The next `n` cookie reads fail.
    pub failing_cookie_reads: AtomicUsize,
    pub closed_pages: AtomicUsize,
}

impl FakeState {
    pub fn set_cookies(&self, pairs: &[(&str, &str)]) {
        *self.cookies.lock().unwrap() = pairs
            .iter()
            .map(|(name, value)| SessionCookie::new(*name, *value, ".example.com"))
            .collect();
    }

    pub fn set_navigation_delay(&self, delay: Duration) {
        *self.navigation_delay.lock().unwrap() = delay;
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeLauncher {
    pub state: Arc<FakeState>,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, kind: SessionKind) -> BrowserResult<Arc<dyn BrowserSession>> {
        if self.state.fail_launch.load(Ordering::SeqCst) {
            return Err(BrowserError::Launch {
                kind,
                reason: "no chromium".into(),
            });
        }
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeSession {
            kind,
            state: Arc::clone(&self.state),
            connected: AtomicBool::new(true),
        }))
    }
}

pub(crate) struct FakeSession {
    kind: SessionKind,
    state: Arc<FakeState>,
    connected: AtomicBool,
}

#[async_trait]
impl BrowserSession for FakeSession {
    fn kind(&self) -> SessionKind {
        self.kind
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ws_endpoint(&self) -> String {
        format!("ws://127.0.0.1:9223/devtools/browser/{}", self.kind)
    }

    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        Ok(Box::new(FakePage {
            state: Arc::clone(&self.state),
        }))
    }

    async fn pages(&self) -> BrowserResult<Vec<Box<dyn BrowserPage>>> {
        let count = self.state.open_pages.load(Ordering::SeqCst);
        Ok((0..count)
            .map(|_| {
                Box::new(FakePage {
                    state: Arc::clone(&self.state),
                }) as Box<dyn BrowserPage>
            })
            .collect())
    }

    async fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

pub(crate) struct FakePage {
    state: Arc<FakeState>,
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn navigate(&self, _url: &Url, timeout: Duration) -> BrowserResult<()> {
        self.state.navigations.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.navigation_delay.lock().unwrap();
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(BrowserError::NavigationTimeout(timeout));
        }
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn cookies(&self, _url: &Url) -> BrowserResult<Vec<SessionCookie>> {
        self.state.cookie_reads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .state
            .failing_cookie_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if failing.is_ok() {
            return Err(BrowserError::Protocol("target closed".into()));
        }
        Ok(self.state.cookies.lock().unwrap().clone())
    }

    async fn close(self: Box<Self>) {
        self.state.closed_pages.fetch_add(1, Ordering::SeqCst);
    }
}
