//! HTTP API handlers and routing.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::OrchestratorError;
use crate::gateway::GatewayManager;
use crate::runtime::{GatewayProcess, ProcessStatus};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<GatewayManager>,
}

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

/// Gateway status response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct GatewayStatusResponse {
    pub ok: bool,
    pub process_id: String,
    pub status: ProcessStatus,
}

/// Error response with captured gateway output.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct GatewayErrorResponse {
    pub ok: bool,
    pub code: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Gateway logs response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct LogsResponse {
    pub process_id: String,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
struct ProcessesResponse {
    processes: Vec<GatewayProcess>,
}

/// API error wrapper; every reconciliation failure is a 503.
#[derive(Debug)]
pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        error!(error = %err, reason = err.reason_code(), "request failed");

        let (stdout, stderr) = match err.captured_output() {
            Some((out, errs)) => (Some(out.to_string()), Some(errs.to_string())),
            None => (None, None),
        };
        let body = GatewayErrorResponse {
            ok: false,
            code: err.reason_code().to_string(),
            error: err.to_string(),
            stdout,
            stderr,
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

/// Create the API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/status", get(gateway_status))
        .route("/api/gateway/restart", post(restart_gateway))
        .route("/debug/processes", get(list_processes))
        .route("/debug/logs", get(gateway_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness of the orchestrator itself; does not touch the sandbox.
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "orchestrator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

fn status_body(process: GatewayProcess) -> Json<GatewayStatusResponse> {
    Json(GatewayStatusResponse {
        ok: true,
        process_id: process.id,
        status: process.status,
    })
}

async fn gateway_status(
    State(state): State<AppState>,
) -> Result<Json<GatewayStatusResponse>, ApiError> {
    let process = state.manager.ensure_gateway().await?;
    Ok(status_body(process))
}

async fn restart_gateway(
    State(state): State<AppState>,
) -> Result<Json<GatewayStatusResponse>, ApiError> {
    let process = state.manager.restart().await?;
    Ok(status_body(process))
}

async fn list_processes(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let processes = state.manager.processes().await?;
    Ok(Json(ProcessesResponse { processes }))
}

async fn gateway_logs(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.manager.gateway_logs().await? {
        Some((process, logs)) => Ok(Json(LogsResponse {
            process_id: process.id,
            stdout: logs.stdout,
            stderr: logs.stderr,
        })
        .into_response()),
        None => Ok((StatusCode::NOT_FOUND, "no gateway process").into_response()),
    }
}
