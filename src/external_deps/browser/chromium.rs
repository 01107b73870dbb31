//! Chromium sessions driven through chromiumoxide.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    GetCookiesParams, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use url::Url;

use super::{
    BrowserError, BrowserLauncher, BrowserPage, BrowserResult, BrowserSession, PageProfile,
    SessionKind,
};
use crate::challenges::core::SessionCookie;

/// Launch flags. chromiumoxide's default set is replaced so that
/// `--enable-automation` is never passed.
const COMMON_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-blink-features=AutomationControlled",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-default-apps",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-renderer-backgrounding",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-first-run",
    "--password-store=basic",
    "--use-mock-keychain",
];

/// CDP command timeout used when none is configured.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn protocol(err: impl std::fmt::Display) -> BrowserError {
    BrowserError::Protocol(err.to_string())
}

/// Launches local Chromium instances.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    profile: PageProfile,
    executable_path: Option<PathBuf>,
    extra_args: Vec<String>,
    debug_port: u16,
    request_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn new(profile: PageProfile) -> Self {
        Self {
            profile,
            executable_path: None,
            extra_args: Vec::new(),
            debug_port: 9223,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_executable(mut self, path: Option<PathBuf>) -> Self {
        self.executable_path = path;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Remote debugging port exposed by interactive sessions.
    pub fn with_debug_port(mut self, port: u16) -> Self {
        self.debug_port = port;
        self
    }

    /// Bound on a single CDP command. Must cover the longest navigation
    /// callers request, since `goto` is itself one command.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn browser_config(&self, kind: SessionKind) -> BrowserResult<BrowserConfig> {
        let (width, height) = self.profile.viewport;
        let mut builder = BrowserConfig::builder()
            .disable_default_args()
            .request_timeout(self.request_timeout)
            .args(COMMON_ARGS.iter().copied())
            .arg(self.profile.lang_flag())
            .args(self.extra_args.iter().cloned())
            .window_size(width, height);

        if let Some(path) = &self.executable_path {
            builder = builder.chrome_executable(path);
        }

        if kind == SessionKind::Interactive {
            builder = builder.with_head().port(self.debug_port);
        }

        builder.build().map_err(|reason| BrowserError::Launch { kind, reason })
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, kind: SessionKind) -> BrowserResult<Arc<dyn BrowserSession>> {
        let config = self.browser_config(kind)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| BrowserError::Launch {
                kind,
                reason: err.to_string(),
            })?;

        let connected = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    log::debug!("{kind} browser handler: {err}");
                }
            }
            flag.store(false, Ordering::Release);
            log::debug!("{kind} browser connection closed");
        });

        let ws_endpoint = browser.websocket_address().clone();
        Ok(Arc::new(ChromiumSession {
            kind,
            browser: Mutex::new(browser),
            ws_endpoint,
            connected,
            profile: self.profile.clone(),
        }))
    }
}

/// A launched Chromium process.
pub struct ChromiumSession {
    kind: SessionKind,
    browser: Mutex<Browser>,
    ws_endpoint: String,
    connected: Arc<AtomicBool>,
    profile: PageProfile,
}

impl ChromiumSession {
    async fn configure(&self, page: &Page) -> BrowserResult<()> {
        let (width, height) = self.profile.viewport;
        page.execute(SetUserAgentOverrideParams::new(self.profile.user_agent.clone()))
            .await
            .map_err(protocol)?;
        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(width),
            i64::from(height),
            1.0,
            false,
        ))
        .await
        .map_err(protocol)?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(
            serde_json::json!({ "accept-language": self.profile.accept_language }),
        )))
        .await
        .map_err(protocol)?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(self.profile.script))
            .await
            .map_err(protocol)?;
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    fn kind(&self) -> SessionKind {
        self.kind
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn ws_endpoint(&self) -> String {
        self.ws_endpoint.clone()
    }

    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        if !self.is_connected() {
            return Err(BrowserError::Disconnected);
        }

        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(protocol)?;

        if let Err(err) = self.configure(&page).await {
            let _ = page.close().await;
            return Err(err);
        }

        Ok(Box::new(ChromiumPage { page }))
    }

    async fn pages(&self) -> BrowserResult<Vec<Box<dyn BrowserPage>>> {
        if !self.is_connected() {
            return Err(BrowserError::Disconnected);
        }

        let pages = self.browser.lock().await.pages().await.map_err(protocol)?;
        Ok(pages
            .into_iter()
            .map(|page| Box::new(ChromiumPage { page }) as Box<dyn BrowserPage>)
            .collect())
    }

    async fn shutdown(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(err) = browser.close().await {
            log::debug!("{} browser close failed: {err}; killing", self.kind);
            let _ = browser.kill().await;
        }
        self.connected.store(false, Ordering::Release);
    }
}

/// A Chromium tab.
pub struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn navigate(&self, url: &Url, timeout: Duration) -> BrowserResult<()> {
        match tokio::time::timeout(timeout, self.page.goto(url.as_str())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(CdpError::Timeout)) | Err(_) => Err(BrowserError::NavigationTimeout(timeout)),
            Ok(Err(err)) => Err(protocol(err)),
        }
    }

    async fn cookies(&self, url: &Url) -> BrowserResult<Vec<SessionCookie>> {
        let params = GetCookiesParams::builder().url(url.as_str()).build();
        let response = self.page.execute(params).await.map_err(protocol)?;
        Ok(response
            .result
            .cookies
            .into_iter()
            .map(|cookie| SessionCookie::new(cookie.name, cookie.value, cookie.domain))
            .collect())
    }

    async fn close(self: Box<Self>) {
        let ChromiumPage { page } = *self;
        if let Err(err) = page.close().await {
            log::debug!("page close failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_deps::browser::{BrowserSessions, PageGuard};

    fn profile() -> PageProfile {
        PageProfile::new(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
            "en-US,en;q=0.9",
        )
    }

    #[test]
    fn launch_flags_never_enable_automation() {
        assert!(!COMMON_ARGS.contains(&"--enable-automation"));
        assert!(COMMON_ARGS.contains(&"--disable-blink-features=AutomationControlled"));
    }

    #[test]
    fn request_timeout_is_configurable() {
        let launcher = ChromiumLauncher::new(profile());
        assert_eq!(launcher.request_timeout, DEFAULT_REQUEST_TIMEOUT);

        let launcher = launcher.with_request_timeout(Duration::from_secs(95));
        assert_eq!(launcher.request_timeout, Duration::from_secs(95));
    }

    #[tokio::test]
    #[ignore = "Requires a local Chromium"]
    async fn reads_cookies_from_rendered_page() {
        let sessions = BrowserSessions::new(Arc::new(ChromiumLauncher::new(profile())));
        let session = sessions.ensure(SessionKind::Headless).await.expect("launch");
        assert!(session.is_connected());

        let page = PageGuard::new(session.new_page().await.expect("page"));
        let url = Url::parse("https://example.com/").unwrap();
        page.navigate(&url, Duration::from_secs(30)).await.expect("navigate");
        let cookies = page.cookies(&url).await.expect("cookies");
        assert!(cookies.iter().all(|cookie| !cookie.name.is_empty()));
        page.release().await;

        sessions.shutdown_all().await;
    }
}
