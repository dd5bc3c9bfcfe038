//! HTTP handlers for the throttle service.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::error::ThrottleError;
use crate::throttle::{ClientAddr, RequestData, ThrottleRule, Throttler};

/// Shared application state.
pub struct AppState {
    /// Throttler holding the rule registry; bound to each request's peer
    pub throttler: Throttler,
}

impl AppState {
    /// Create state around a configured throttler.
    pub fn new(throttler: Throttler) -> Self {
        Self { throttler }
    }

    fn throttler_for(&self, peer: SocketAddr) -> Throttler {
        self.throttler
            .with_request_context(Arc::new(ClientAddr::from(peer)))
    }
}

/// Body of delay and event requests.
#[derive(Debug, Default, Deserialize)]
pub struct ThrottleRequest {
    /// Correlation fields, e.g. `user_identifier`
    #[serde(default)]
    pub data: RequestData,
}

/// Delay check response.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DelayResponse {
    pub rule: String,
    pub occurrences: u64,
    pub delay_secs: u64,
    pub retry_after_secs: u64,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Throttle errors as HTTP responses.
///
/// Every error this service can produce is an operator problem (an
/// unregistered rule name, a failing store), so all map to 500.
#[derive(Debug)]
pub struct ApiError(pub ThrottleError);

impl From<ThrottleError> for ApiError {
    fn from(err: ThrottleError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, code = self.0.code(), "Throttle request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: self.0.code(),
            }),
        )
            .into_response()
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "throttled",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// List every registered rule; inert rules are `null`.
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<String, Option<ThrottleRule>>> {
    Json(state.throttler.throttle_rules().clone())
}

/// Fetch one rule by name.
pub async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Option<ThrottleRule>>, ApiError> {
    let rule = state.throttler.get_rule(&name)?;
    Ok(Json(rule.cloned()))
}

/// How long the caller must wait before repeating the action `name`.
#[instrument(skip_all, fields(rule = %name, peer = %peer))]
pub async fn get_delay(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(request): Json<ThrottleRequest>,
) -> Result<Json<DelayResponse>, ApiError> {
    let status = state
        .throttler_for(peer)
        .check(&name, &request.data)
        .await?;

    debug!(
        rule = %name,
        occurrences = status.occurrences,
        delay = status.delay,
        "Delay check answered"
    );

    Ok(Json(DelayResponse {
        rule: status.rule,
        occurrences: status.occurrences,
        delay_secs: status.delay,
        retry_after_secs: status.retry_after,
    }))
}

/// Record that the action `name` was attempted.
#[instrument(skip_all, fields(rule = %name, peer = %peer))]
pub async fn log_event(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(request): Json<ThrottleRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .throttler_for(peer)
        .log_event(&name, &request.data)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
