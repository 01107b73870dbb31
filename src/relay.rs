//! High level relay orchestration.
//!
//! Wires together the upstream transport, the challenge detector, the
//! credential store, the refresh coordinator and the manual poller behind a
//! single context object shared by every HTTP handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use url::Url;

use crate::challenges::core::{
	ReqwestUpstreamClient, UpstreamClient, UpstreamError, UpstreamRequest, UpstreamResponse,
	join_upstream, normalize_path, upstream_path,
};
use crate::challenges::detectors::{ChallengeDetector, ChallengeTrigger};
use crate::config::{ConfigError, RelayConfig};
use crate::credentials::CredentialStore;
use crate::external_deps::browser::{
	BrowserError, BrowserLauncher, BrowserSessions, ChromiumLauncher, PageProfile, SessionKind,
};
use crate::manual::{ManualSessionPoller, PollConfig, PollState};
use crate::modules::events::{
	ChallengeEvent, EventDispatcher, EventHandler, LoggingHandler, MetricsHandler, RelayEvent,
	UpstreamEvent,
};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::refresh::{RefreshCoordinator, RefreshError, RefreshSettings};

/// Headroom added on top of the longest navigation bound when sizing the
/// browser's command timeout.
const CDP_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Result alias used across the orchestration layer.
pub type RelayResult<T> = Result<T, RelayError>;

/// High-level error surfaced by the relay.
#[derive(Debug, Error)]
pub enum RelayError {
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("url parse error: {0}")]
	Url(#[from] url::ParseError),
	#[error("upstream error: {0}")]
	Upstream(#[from] UpstreamError),
	#[error("browser error: {0}")]
	Browser(#[from] BrowserError),
	#[error("refresh failed: {0}")]
	Refresh(#[from] RefreshError),
}

/// Response handed back to the client.
#[derive(Debug, Clone)]
pub struct RelayResponse {
	pub status: u16,
	pub content_type: Option<String>,
	pub body: Bytes,
}

impl RelayResponse {
	/// Fixed reply for transport failures.
	pub fn proxy_error() -> Self {
		Self {
			status: 500,
			content_type: Some("text/plain; charset=utf-8".to_string()),
			body: Bytes::from_static(b"proxy error"),
		}
	}
}

impl From<UpstreamResponse> for RelayResponse {
	fn from(response: UpstreamResponse) -> Self {
		Self {
			status: response.status,
			content_type: response.content_type,
			body: response.body.into_bytes(),
		}
	}
}

/// Credential state reported by `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialStatus {
	pub has_cookie: bool,
	pub updated_at: Option<i64>,
}

/// Operator instructions returned after opening the interactive browser.
#[derive(Debug, Clone)]
pub struct ManualTicket {
	pub ws_endpoint: String,
	pub tip: String,
}

/// Outcome of an explicit pull from the interactive browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullReport {
	pub success: bool,
	pub status: CredentialStatus,
}

/// Fluent builder for [`ClearanceRelay`].
pub struct ClearanceRelayBuilder {
	config: RelayConfig,
	launcher: Option<Arc<dyn BrowserLauncher>>,
	client: Option<Arc<dyn UpstreamClient>>,
	detector: ChallengeDetector,
	handlers: Vec<Arc<dyn EventHandler>>,
	enable_metrics: bool,
}

impl ClearanceRelayBuilder {
	pub fn new(config: RelayConfig) -> Self {
		Self {
			config,
			launcher: None,
			client: None,
			detector: ChallengeDetector::default(),
			handlers: Vec::new(),
			enable_metrics: true,
		}
	}

	pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
		self.launcher = Some(launcher);
		self
	}

	pub fn with_upstream_client(mut self, client: Arc<dyn UpstreamClient>) -> Self {
		self.client = Some(client);
		self
	}

	pub fn with_detector(mut self, detector: ChallengeDetector) -> Self {
		self.detector = detector;
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn disable_metrics(mut self) -> Self {
		self.enable_metrics = false;
		self
	}

	pub fn build(self) -> RelayResult<ClearanceRelay> {
		ClearanceRelay::with_parts(self)
	}
}

/// Process-lifetime relay context.
pub struct ClearanceRelay {
	config: RelayConfig,
	client: Arc<dyn UpstreamClient>,
	detector: ChallengeDetector,
	credentials: CredentialStore,
	sessions: Arc<BrowserSessions>,
	refresher: RefreshCoordinator,
	poller: ManualSessionPoller,
	metrics: MetricsCollector,
	events: Arc<EventDispatcher>,
}

impl ClearanceRelay {
	/// Relay backed by Chromium and reqwest.
	pub fn new(config: RelayConfig) -> RelayResult<Self> {
		ClearanceRelayBuilder::new(config).build()
	}

	pub fn builder(config: RelayConfig) -> ClearanceRelayBuilder {
		ClearanceRelayBuilder::new(config)
	}

	fn with_parts(parts: ClearanceRelayBuilder) -> RelayResult<Self> {
		let ClearanceRelayBuilder {
			config,
			launcher,
			client,
			detector,
			handlers,
			enable_metrics,
		} = parts;

		let launcher: Arc<dyn BrowserLauncher> = match launcher {
			Some(launcher) => launcher,
			None => Arc::new(chromium_launcher(&config)),
		};
		let client: Arc<dyn UpstreamClient> = match client {
			Some(client) => client,
			None => Arc::new(ReqwestUpstreamClient::new()?),
		};

		let credentials = CredentialStore::new(config.clearance_cookie.clone());
		if let Some(seed) = &config.seed_credential {
			credentials.seed(seed.clone());
		}

		let metrics = MetricsCollector::new();
		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		if enable_metrics {
			events.register_handler(Arc::new(MetricsHandler::new(metrics.clone())));
		}
		for handler in handlers {
			events.register_handler(handler);
		}
		let events = Arc::new(events);

		let sessions = Arc::new(BrowserSessions::new(launcher));
		let refresher = RefreshCoordinator::new(
			Arc::clone(&sessions),
			credentials.clone(),
			config.upstream.clone(),
			RefreshSettings {
				settle_delay: config.settle_delay,
				navigation_timeout: config.refresh_timeout,
			},
			Arc::clone(&events),
		);
		let poller = ManualSessionPoller::new(
			Arc::clone(&sessions),
			credentials.clone(),
			config.upstream.clone(),
			PollConfig {
				interval: config.poll_interval,
				max_duration: config.poll_max_duration,
				pull_timeout: config.pull_timeout,
			},
			Arc::clone(&events),
		);

		Ok(Self {
			config,
			client,
			detector,
			credentials,
			sessions,
			refresher,
			poller,
			metrics,
			events,
		})
	}

	pub fn config(&self) -> &RelayConfig {
		&self.config
	}

	pub fn credentials(&self) -> &CredentialStore {
		&self.credentials
	}

	pub fn refresher(&self) -> &RefreshCoordinator {
		&self.refresher
	}

	pub fn poll_state(&self) -> PollState {
		self.poller.state()
	}

	/// Forward a client request to the upstream.
	///
	/// A `403` or a challenge page triggers one headless refresh followed by
	/// exactly one retry. Transport failures become [`RelayResponse::proxy_error`].
	pub async fn handle(&self, request_path: &str) -> RelayResponse {
		match self.forward(request_path).await {
			Ok(response) => response,
			Err(err) => {
				log::warn!("proxy error for {request_path}: {err}");
				self.events
					.dispatch(RelayEvent::error(self.config.upstream_host(), &err));
				RelayResponse::proxy_error()
			}
		}
	}

	async fn forward(&self, request_path: &str) -> RelayResult<RelayResponse> {
		let path = upstream_path(request_path);
		let url = join_upstream(&self.config.upstream, &path)?;

		let first = self.fetch(&url, 1).await?;
		let Some(trigger) = ChallengeTrigger::evaluate(first.status, &first.body, &self.detector)
		else {
			return Ok(first.into());
		};

		let indicators = match &trigger {
			ChallengeTrigger::ChallengePage(detection) => detection.matched_indicators.clone(),
			ChallengeTrigger::Forbidden => Vec::new(),
		};
		self.events.dispatch(RelayEvent::Challenge(ChallengeEvent {
			url: url.clone(),
			trigger: trigger.label().to_string(),
			indicators,
			timestamp: Utc::now(),
		}));

		// A failed refresh still gets its retry, with whatever credential exists.
		if let Err(err) = self.refresher.refresh(SessionKind::Headless, &path).await {
			log::debug!("retrying {url} after failed refresh: {err}");
		}

		let retry = self.fetch(&url, 2).await?;
		Ok(retry.into())
	}

	async fn fetch(&self, url: &Url, attempt: u8) -> RelayResult<UpstreamResponse> {
		let mut request = UpstreamRequest::new(
			url.clone(),
			self.config.user_agent.as_str(),
			self.config.accept_language.as_str(),
		)
		.with_timeout(self.config.upstream_timeout);
		if let Some(header) = self.credentials.get().header() {
			request = request.with_cookie(header);
		}

		let started = Instant::now();
		let response = self.client.fetch(&request).await?;
		self.events.dispatch(RelayEvent::Upstream(UpstreamEvent {
			url: url.clone(),
			status: response.status,
			latency: started.elapsed(),
			attempt,
			timestamp: Utc::now(),
		}));
		Ok(response)
	}

	pub fn status(&self) -> CredentialStatus {
		let credential = self.credentials.get();
		CredentialStatus {
			has_cookie: !credential.is_empty(),
			updated_at: credential.captured_at.map(|at| at.timestamp_millis()),
		}
	}

	/// Open the interactive browser on `path`, (re)start polling and return
	/// remote-debugging instructions. The page is left open for the operator.
	pub async fn manual_refresh(&self, path: Option<&str>) -> RelayResult<ManualTicket> {
		let session = self.poller.start().await?;
		let target = join_upstream(&self.config.upstream, &normalize_path(path))?;

		let page = session.new_page().await?;
		page.navigate(&target, self.config.refresh_timeout).await?;

		let port = self.config.debug_port;
		Ok(ManualTicket {
			ws_endpoint: session.ws_endpoint(),
			tip: format!(
				"ssh -L {port}:127.0.0.1:{port} server && chrome://inspect -> configure -> localhost:{port}"
			),
		})
	}

	/// Pull cookies from the interactive browser right now.
	pub async fn manual_pull(&self) -> RelayResult<PullReport> {
		let success = self.poller.pull_now().await?;
		Ok(PullReport {
			success,
			status: self.status(),
		})
	}

	pub fn metrics(&self) -> MetricsSnapshot {
		self.metrics.snapshot()
	}

	/// Stop polling and close both browsers.
	pub async fn shutdown(&self) {
		self.poller.cancel();
		self.sessions.shutdown_all().await;
	}
}

fn chromium_launcher(config: &RelayConfig) -> ChromiumLauncher {
	let (width, height) = config.viewport;
	let profile = PageProfile::new(config.user_agent.as_str(), config.accept_language.as_str())
		.with_viewport(width, height);
	let request_timeout = config.refresh_timeout.max(config.pull_timeout) + CDP_TIMEOUT_MARGIN;
	ChromiumLauncher::new(profile)
		.with_executable(config.executable_path.clone())
		.with_extra_args(config.extra_args.clone())
		.with_debug_port(config.debug_port)
		.with_request_timeout(request_timeout)
}
