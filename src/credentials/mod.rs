//! Process-wide clearance credential.
//!
//! Holds the `cookie` header forwarded upstream together with the moment it was
//! captured. Readers always receive a whole snapshot; replacement swaps the
//! snapshot under a write lock, so a reader sees either the previous or the
//! new credential and never a mix.

use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

use crate::challenges::core::SessionCookie;

/// Cookie whose presence proves a solved challenge.
pub const DEFAULT_CLEARANCE_COOKIE: &str = "cf_clearance";

/// Snapshot of the forwarded credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub header: String,
    /// `None` for an empty store or a seeded credential.
    pub captured_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    /// Header value, if any.
    pub fn header(&self) -> Option<&str> {
        (!self.header.is_empty()).then_some(self.header.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("cookie '{0}' not found")]
    MissingCookie(String),
}

/// Thread-safe credential store shared by the relay, the refresher and the
/// manual poller.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    inner: Arc<RwLock<Arc<Credential>>>,
    cookie_name: Arc<str>,
}

impl CredentialStore {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(Credential::default()))),
            cookie_name: Arc::from(cookie_name.into()),
        }
    }

    /// Name of the cookie `set` requires.
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Current snapshot, possibly empty.
    pub fn get(&self) -> Arc<Credential> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_credential(&self) -> bool {
        !self.get().is_empty()
    }

    /// Capture time in epoch milliseconds.
    pub fn updated_at_millis(&self) -> Option<i64> {
        self.get().captured_at.map(|at| at.timestamp_millis())
    }

    /// Install a configured credential. It carries no capture time.
    pub fn seed(&self, header: impl Into<String>) {
        let header = header.into();
        if header.is_empty() {
            return;
        }
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(Credential {
            header,
            captured_at: None,
        });
    }

    /// Replace the credential from a browser cookie set.
    ///
    /// Fails without touching the store when the clearance cookie is absent.
    /// The header is built from every cookie in the set, not just the
    /// clearance one.
    pub fn set(&self, cookies: &[SessionCookie]) -> Result<Arc<Credential>, CredentialError> {
        let clearance = cookies
            .iter()
            .find(|cookie| cookie.name == *self.cookie_name)
            .ok_or_else(|| CredentialError::MissingCookie(self.cookie_name.to_string()))?;

        let header = cookies
            .iter()
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ");

        let credential = {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let now = Utc::now();
            let captured_at = match guard.captured_at {
                Some(previous) if previous > now => previous,
                _ => now,
            };
            let credential = Arc::new(Credential {
                header,
                captured_at: Some(captured_at),
            });
            *guard = credential.clone();
            credential
        };

        let domain = if clearance.domain.is_empty() {
            "n/a"
        } else {
            clearance.domain.as_str()
        };
        if let Some(at) = credential.captured_at {
            log::info!(
                "[cf] updated at {} from domain={}",
                at.to_rfc3339(),
                domain
            );
        }

        Ok(credential)
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_CLEARANCE_COOKIE)
    }
}
