//! Core utilities shared by the detector, the upstream transport, and the
//! credential layer.

pub mod analysis;
pub mod reqwest_client;
pub mod types;

pub use analysis::{PROXY_PREFIX, join_upstream, normalize_path, upstream_path};
pub use reqwest_client::{ReqwestUpstreamClient, UpstreamClient, UpstreamError};
pub use types::{SessionCookie, UpstreamBody, UpstreamRequest, UpstreamResponse};
