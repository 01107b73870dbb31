//! Core data structures shared by the upstream transport, the detector, and
//! the credential layer.

use std::time::Duration;

use bytes::Bytes;
use url::Url;

/// Request issued against the fixed upstream.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: Url,
    pub cookie: Option<String>,
    pub user_agent: String,
    pub accept_language: String,
    pub timeout: Duration,
}

impl UpstreamRequest {
    pub fn new(
        url: Url,
        user_agent: impl Into<String>,
        accept_language: impl Into<String>,
    ) -> Self {
        Self {
            url,
            cookie: None,
            user_agent: user_agent.into(),
            accept_language: accept_language.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Attach a `cookie` header. Empty values are ignored.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        let cookie = cookie.into();
        self.cookie = (!cookie.is_empty()).then_some(cookie);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Upstream body as received. Bodies that are not valid UTF-8 stay binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamBody {
    Text(String),
    Binary(Bytes),
}

impl UpstreamBody {
    pub fn from_bytes(bytes: Bytes) -> Self {
        match std::str::from_utf8(&bytes) {
            Ok(text) => UpstreamBody::Text(text.to_owned()),
            Err(_) => UpstreamBody::Binary(bytes),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            UpstreamBody::Text(text) => Some(text),
            UpstreamBody::Binary(_) => None,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            UpstreamBody::Text(text) => Bytes::from(text),
            UpstreamBody::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            UpstreamBody::Text(text) => text.len(),
            UpstreamBody::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Minimal representation of an upstream HTTP response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: UpstreamBody,
}

/// Cookie read from an automated browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

impl SessionCookie {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
        }
    }
}
