//! Integrations that rely on software outside the relay.
//!
//! Groups the adapter for the automated browser that renders the upstream and
//! hands back post-challenge cookies.

pub mod browser;

pub use browser::{
    BrowserError, BrowserLauncher, BrowserPage, BrowserResult, BrowserSession, BrowserSessions,
    ChromiumLauncher, PageGuard, PageProfile, SessionKind,
};
