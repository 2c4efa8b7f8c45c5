//! Liveness and readiness checks

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Liveness check
pub async fn healthz(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "ok".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Readiness response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub audit_events: u64,
    pub halted: bool,
}

/// Readiness check: the audit log must be readable
pub async fn readyz(State(state): State<AppState>) -> ApiResult<Json<ReadinessResponse>> {
    let snapshot = state.orchestrator.state().await?;
    Ok(Json(ReadinessResponse {
        status: "ready".to_string(),
        audit_events: snapshot.audit_events,
        halted: snapshot.halted,
    }))
}
