//! Reqwest-based implementation of the `UpstreamClient` trait.
//!
//! Provides a thin adapter around `reqwest::Client` that converts between the
//! shared upstream representations used by the relay and the concrete
//! transport.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest::Client;
use thiserror::Error;

use super::types::{UpstreamBody, UpstreamRequest, UpstreamResponse};

/// Contract that abstracts the transport used to reach the upstream.
///
/// Implementations must resolve every HTTP status to an [`UpstreamResponse`];
/// only transport-level failures are errors.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("invalid header '{0}'")]
    InvalidHeader(&'static str),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

/// Reqwest-backed client used for every upstream fetch.
pub struct ReqwestUpstreamClient {
    client: Client,
}

impl ReqwestUpstreamClient {
    /// Creates a client without a cookie jar; the credential header is the
    /// only cookie state sent upstream.
    pub fn new() -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .build()
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstreamClient {
    async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let mut builder = self
            .client
            .get(request.url.as_str())
            .timeout(request.timeout)
            .header(USER_AGENT, request.user_agent.as_str())
            .header(ACCEPT_LANGUAGE, request.accept_language.as_str());

        if let Some(cookie) = request.cookie.as_deref() {
            http::HeaderValue::from_str(cookie)
                .map_err(|_| UpstreamError::InvalidHeader("cookie"))?;
            builder = builder.header(COOKIE, cookie);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body: UpstreamBody::from_bytes(body),
        })
    }
}

type _AssertSync = Arc<ReqwestUpstreamClient>;
