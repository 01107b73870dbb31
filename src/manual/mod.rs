//! Human-assisted credential recovery.
//!
//! An operator solves the challenge in the interactive browser through remote
//! debugging while a background task polls that browser for the clearance
//! cookie. Polling stops on the first capture or once the polling window
//! elapses, whichever comes first.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

use crate::credentials::CredentialStore;
use crate::external_deps::browser::{
    BrowserResult, BrowserSession, BrowserSessions, PageGuard, SessionKind,
};
use crate::modules::events::{EventDispatcher, ManualAction, RelayEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_duration: Duration,
    /// Bound on the fallback navigation inside a pull.
    pub pull_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3_000),
            max_duration: Duration::from_millis(180_000),
            pull_timeout: Duration::from_millis(20_000),
        }
    }
}

/// Reads cookies out of the interactive browser.
#[derive(Clone)]
struct CookiePuller {
    credentials: CredentialStore,
    upstream: Url,
    pull_timeout: Duration,
}

impl CookiePuller {
    /// Try every open page, then a fresh page on the upstream root. Returns
    /// whether the store was updated.
    async fn pull(&self, session: &dyn BrowserSession) -> BrowserResult<bool> {
        for page in session.pages().await? {
            match page.cookies(&self.upstream).await {
                Ok(cookies) => {
                    if self.credentials.set(&cookies).is_ok() {
                        return Ok(true);
                    }
                }
                Err(err) => log::warn!("[manual] page cookie read failed: {err}"),
            }
        }

        let page = PageGuard::new(session.new_page().await?);
        let cookies = match page.navigate(&self.upstream, self.pull_timeout).await {
            Ok(()) => page.cookies(&self.upstream).await,
            Err(err) => Err(err),
        };
        page.release().await;

        Ok(self.credentials.set(&cookies?).is_ok())
    }
}

/// Bounded poll schedule over the interactive session.
pub struct ManualSessionPoller {
    sessions: Arc<BrowserSessions>,
    puller: CookiePuller,
    config: PollConfig,
    task: Mutex<Option<JoinHandle<()>>>,
    events: Arc<EventDispatcher>,
}

impl ManualSessionPoller {
    pub fn new(
        sessions: Arc<BrowserSessions>,
        credentials: CredentialStore,
        upstream: Url,
        config: PollConfig,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            sessions,
            puller: CookiePuller {
                credentials,
                upstream,
                pull_timeout: config.pull_timeout,
            },
            config,
            task: Mutex::new(None),
            events,
        }
    }

    /// (Re)start polling. Any running schedule is aborted first, then the
    /// interactive session is ensured and a new schedule spawned.
    pub async fn start(&self) -> BrowserResult<Arc<dyn BrowserSession>> {
        self.cancel();
        let session = self.sessions.ensure(SessionKind::Interactive).await?;

        let handle = tokio::spawn(poll_loop(
            Arc::clone(&session),
            self.puller.clone(),
            self.config,
            Arc::clone(&self.events),
        ));
        self.events.dispatch(RelayEvent::manual(ManualAction::Started));

        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        Ok(session)
    }

    /// Stop the running schedule, if any.
    pub fn cancel(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && !handle.is_finished()
        {
            handle.abort();
            self.events.dispatch(RelayEvent::manual(ManualAction::Cancelled));
        }
    }

    pub fn state(&self) -> PollState {
        match self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(handle) if !handle.is_finished() => PollState::Polling,
            _ => PollState::Idle,
        }
    }

    /// One pull from `session`.
    pub async fn pull(&self, session: &dyn BrowserSession) -> BrowserResult<bool> {
        self.puller.pull(session).await
    }

    /// One pull from the current interactive session. `false` when there is
    /// none.
    pub async fn pull_now(&self) -> BrowserResult<bool> {
        match self.sessions.current(SessionKind::Interactive).await {
            Some(session) => self.pull(session.as_ref()).await,
            None => Ok(false),
        }
    }
}

async fn poll_loop(
    session: Arc<dyn BrowserSession>,
    puller: CookiePuller,
    config: PollConfig,
    events: Arc<EventDispatcher>,
) {
    let ticks = async {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match puller.pull(session.as_ref()).await {
                Ok(true) => return,
                Ok(false) => log::debug!("[manual] no clearance cookie yet"),
                Err(err) => log::warn!("[manual] poll error: {err}"),
            }
        }
    };

    match tokio::time::timeout(config.max_duration, ticks).await {
        Ok(()) => events.dispatch(RelayEvent::manual(ManualAction::Captured)),
        Err(_) => events.dispatch(RelayEvent::manual(ManualAction::Expired)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_deps::browser::fake::FakeLauncher;
    use std::sync::atomic::Ordering;

    fn poller(launcher: &FakeLauncher, store: &CredentialStore) -> ManualSessionPoller {
        ManualSessionPoller::new(
            Arc::new(BrowserSessions::new(Arc::new(launcher.clone()))),
            store.clone(),
            Url::parse("https://example.com").unwrap(),
            PollConfig {
                interval: Duration::from_secs(3),
                max_duration: Duration::from_secs(10),
                pull_timeout: Duration::from_secs(2),
            },
            Arc::new(EventDispatcher::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn polling_ends_when_window_elapses() {
        let launcher = FakeLauncher::default();
        let store = CredentialStore::default();
        let poller = poller(&launcher, &store);

        poller.start().await.unwrap();
        assert_eq!(poller.state(), PollState::Polling);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(poller.state(), PollState::Idle);
        assert!(!store.has_credential());
        assert_eq!(launcher.state.navigations.load(Ordering::SeqCst), 3);
        assert_eq!(launcher.state.closed_pages.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(launcher.state.navigations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_from_open_page_stops_polling() {
        let launcher = FakeLauncher::default();
        launcher.state.open_pages.store(1, Ordering::SeqCst);
        launcher.state.set_cookies(&[("cf_clearance", "human")]);
        let store = CredentialStore::default();
        let poller = poller(&launcher, &store);

        poller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(poller.state(), PollState::Idle);
        assert_eq!(store.get().header, "cf_clearance=human");
        assert_eq!(launcher.state.navigations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_page_read_does_not_stop_capture() {
        let launcher = FakeLauncher::default();
        launcher.state.open_pages.store(2, Ordering::SeqCst);
        launcher.state.failing_cookie_reads.store(1, Ordering::SeqCst);
        launcher.state.set_cookies(&[("cf_clearance", "human")]);
        let store = CredentialStore::default();
        let poller = poller(&launcher, &store);

        poller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(poller.state(), PollState::Idle);
        assert_eq!(store.get().header, "cf_clearance=human");
        assert_eq!(launcher.state.cookie_reads.load(Ordering::SeqCst), 2);
        assert_eq!(launcher.state.navigations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_only_page_falls_back_to_fresh_page() {
        let launcher = FakeLauncher::default();
        launcher.state.open_pages.store(1, Ordering::SeqCst);
        launcher.state.failing_cookie_reads.store(1, Ordering::SeqCst);
        launcher.state.set_cookies(&[("cf_clearance", "fallback")]);
        let store = CredentialStore::default();
        let poller = poller(&launcher, &store);

        poller.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(poller.state(), PollState::Idle);
        assert_eq!(store.get().header, "cf_clearance=fallback");
        assert_eq!(launcher.state.navigations.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.state.closed_pages.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_schedule() {
        let launcher = FakeLauncher::default();
        let store = CredentialStore::default();
        let poller = poller(&launcher, &store);

        poller.start().await.unwrap();
        poller.start().await.unwrap();
        assert_eq!(poller.state(), PollState::Polling);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(launcher.state.launches.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.state.navigations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_returns_to_idle() {
        let launcher = FakeLauncher::default();
        let store = CredentialStore::default();
        let poller = poller(&launcher, &store);

        poller.start().await.unwrap();
        poller.cancel();
        assert_eq!(poller.state(), PollState::Idle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(launcher.state.navigations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pull_now_without_session_reports_false() {
        let launcher = FakeLauncher::default();
        let store = CredentialStore::default();
        let poller = poller(&launcher, &store);

        assert!(!poller.pull_now().await.unwrap());
        assert_eq!(launcher.state.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pull_now_uses_fresh_page_when_no_page_has_cookie() {
        let launcher = FakeLauncher::default();
        launcher.state.set_cookies(&[("cf_clearance", "fresh")]);
        let store = CredentialStore::default();
        let poller = poller(&launcher, &store);
        poller.start().await.unwrap();
        poller.cancel();

        assert!(poller.pull_now().await.unwrap());
        assert_eq!(store.get().header, "cf_clearance=fresh");
        assert_eq!(launcher.state.closed_pages.load(Ordering::SeqCst), 1);
    }
}
