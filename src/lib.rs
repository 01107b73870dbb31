//! # cf-clearance-proxy
//!
//! A forwarding proxy that keeps a Cloudflare clearance cookie fresh.
//!
//! Requests under `/proxy` are relayed to a single fixed upstream with the
//! current credential attached. When the upstream answers with a `403` or a
//! challenge page, a headless Chromium renders the page, the resulting
//! cookies replace the credential and the request is retried once. For
//! challenges a headless browser cannot pass, an operator can drive a headed
//! browser over remote debugging while the relay polls it for the cookie.
//!
//! ## Features
//!
//! - Single shared credential with atomic replacement
//! - Single-flight refresh: concurrent challenged requests share one browser run
//! - Substring challenge heuristic plus `403` detection
//! - Bounded manual polling with idempotent restart
//! - Structured events feeding logs and metrics
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cf_clearance_proxy::{ClearanceRelay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = Arc::new(ClearanceRelay::new(RelayConfig::from_env()?)?);
//!     let response = relay.handle("/proxy/leaderboard?region=NA").await;
//!     println!("{} ({} bytes)", response.status, response.body.len());
//!     relay.shutdown().await;
//!     Ok(())
//! }
//! ```

mod relay;

pub mod challenges;
pub mod config;
pub mod credentials;
pub mod external_deps;
pub mod manual;
pub mod modules;
pub mod refresh;
pub mod server;

pub use crate::relay::{
    ClearanceRelay,
    ClearanceRelayBuilder,
    CredentialStatus,
    ManualTicket,
    PullReport,
    RelayError,
    RelayResponse,
    RelayResult,
};

pub use crate::challenges::core::{
    ReqwestUpstreamClient,
    SessionCookie,
    UpstreamBody,
    UpstreamClient,
    UpstreamError,
    UpstreamRequest,
    UpstreamResponse,
};

pub use crate::challenges::detectors::{
    ChallengeDetection,
    ChallengeDetector,
    ChallengeTrigger,
    ChallengeType,
};

pub use crate::config::{ConfigError, RelayConfig, RelayConfigBuilder};

pub use crate::credentials::{Credential, CredentialError, CredentialStore};

pub use crate::external_deps::browser::{
    BrowserError,
    BrowserLauncher,
    BrowserPage,
    BrowserResult,
    BrowserSession,
    BrowserSessions,
    ChromiumLauncher,
    PageGuard,
    PageProfile,
    SessionKind,
};

pub use crate::manual::{ManualSessionPoller, PollConfig, PollState};

pub use crate::modules::{
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    RelayEvent,
};

pub use crate::refresh::{
    FlightAborted, RefreshCoordinator, RefreshError, RefreshSettings, SingleFlight,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
