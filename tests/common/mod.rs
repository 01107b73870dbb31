#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cf_clearance_proxy::{
    BrowserLauncher, BrowserPage, BrowserResult, BrowserSession, ClearanceRelay, RelayConfig,
    SessionCookie, SessionKind,
};
use url::Url;
use wiremock::MockServer;

/// Browser stand-in: every page "solves" the challenge after a delay and
/// reports the configured cookies.
#[derive(Default)]
pub struct Recorder {
    pub cookies: Mutex<Vec<SessionCookie>>,
    pub navigation_delay: Mutex<Duration>,
    pub launches: AtomicUsize,
    pub navigations: AtomicUsize,
    pub visited: Mutex<Vec<String>>,
    pub closed_pages: AtomicUsize,
}

impl Recorder {
    pub fn solve_with(&self, pairs: &[(&str, &str)]) {
        *self.cookies.lock().unwrap() = pairs
            .iter()
            .map(|(name, value)| SessionCookie::new(*name, *value, "127.0.0.1"))
            .collect();
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    pub recorder: Arc<Recorder>,
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self, kind: SessionKind) -> BrowserResult<Arc<dyn BrowserSession>> {
        self.recorder.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            kind,
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

struct ScriptedSession {
    kind: SessionKind,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    fn kind(&self) -> SessionKind {
        self.kind
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn ws_endpoint(&self) -> String {
        "ws://127.0.0.1:9223/devtools/browser/scripted".to_string()
    }

    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        Ok(Box::new(ScriptedPage {
            recorder: Arc::clone(&self.recorder),
        }))
    }

    async fn pages(&self) -> BrowserResult<Vec<Box<dyn BrowserPage>>> {
        Ok(Vec::new())
    }

    async fn shutdown(&self) {}
}

struct ScriptedPage {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn navigate(&self, url: &Url, _timeout: Duration) -> BrowserResult<()> {
        self.recorder.navigations.fetch_add(1, Ordering::SeqCst);
        self.recorder.visited.lock().unwrap().push(url.to_string());
        let delay = *self.recorder.navigation_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn cookies(&self, _url: &Url) -> BrowserResult<Vec<SessionCookie>> {
        Ok(self.recorder.cookies.lock().unwrap().clone())
    }

    async fn close(self: Box<Self>) {
        self.recorder.closed_pages.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn relay_for(upstream: &MockServer, launcher: &ScriptedLauncher) -> Arc<ClearanceRelay> {
    let config = RelayConfig::builder()
        .with_upstream(Url::parse(&upstream.uri()).unwrap())
        .with_settle_delay(Duration::from_millis(10))
        .with_upstream_timeout(Duration::from_secs(5))
        .build();
    Arc::new(
        ClearanceRelay::builder(config)
            .with_launcher(Arc::new(launcher.clone()))
            .build()
            .unwrap(),
    )
}
