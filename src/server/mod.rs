//! HTTP surface.
//!
//! `/status`, `/metrics`, the operator endpoints under `/manual` and the
//! forwarding endpoint under `/proxy`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{OriginalUri, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};

use crate::relay::{ClearanceRelay, CredentialStatus, RelayError, RelayResponse};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    has_cookie: bool,
    updated_at: Option<i64>,
}

impl From<CredentialStatus> for StatusBody {
    fn from(status: CredentialStatus) -> Self {
        Self {
            has_cookie: status.has_cookie,
            updated_at: status.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TicketBody {
    ws_endpoint: String,
    tip: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullBody {
    success: bool,
    has_cookie: bool,
    updated_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ManualRefreshQuery {
    path: Option<String>,
}

/// JSON `{ "error": ... }` reply with status 500.
struct ApiError(RelayError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::warn!("operator request failed: {}", self.0);
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

pub fn router(relay: Arc<ClearanceRelay>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/manual/refresh", get(manual_refresh))
        .route("/manual/pull", get(manual_pull))
        .route("/proxy", get(proxy))
        .route("/proxy/*rest", get(proxy))
        .with_state(relay)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(
    relay: Arc<ClearanceRelay>,
    addr: SocketAddr,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("proxy listening on {}", listener.local_addr()?);
    log::info!("upstream: {}", relay.config().upstream);

    axum::serve(listener, router(relay))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn status(State(relay): State<Arc<ClearanceRelay>>) -> Json<StatusBody> {
    Json(relay.status().into())
}

async fn metrics(State(relay): State<Arc<ClearanceRelay>>) -> impl IntoResponse {
    Json(relay.metrics())
}

async fn manual_refresh(
    State(relay): State<Arc<ClearanceRelay>>,
    Query(query): Query<ManualRefreshQuery>,
) -> Result<Json<TicketBody>, ApiError> {
    let ticket = relay.manual_refresh(query.path.as_deref()).await?;
    Ok(Json(TicketBody {
        ws_endpoint: ticket.ws_endpoint,
        tip: ticket.tip,
    }))
}

async fn manual_pull(
    State(relay): State<Arc<ClearanceRelay>>,
) -> Result<Json<PullBody>, ApiError> {
    let report = relay.manual_pull().await?;
    Ok(Json(PullBody {
        success: report.success,
        has_cookie: report.status.has_cookie,
        updated_at: report.status.updated_at,
    }))
}

async fn proxy(
    State(relay): State<Arc<ClearanceRelay>>,
    OriginalUri(uri): OriginalUri,
) -> Response {
    let request_path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    relay_response(relay.handle(request_path).await)
}

fn relay_response(relayed: RelayResponse) -> Response {
    let status = StatusCode::from_u16(relayed.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(relayed.body));
    *response.status_mut() = status;
    if let Some(content_type) = relayed
        .content_type
        .as_deref()
        .and_then(|value| header::HeaderValue::from_str(value).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    response
}
