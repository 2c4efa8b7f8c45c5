//! Internal-control handlers: the only way plans are approved or executed

use super::governance::parse_plan_id;
use crate::api::rest::auth::Principal;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use serde::Deserialize;
use warden_core::{ApprovalRecord, Plan, StateSnapshot};

/// Halt request
#[derive(Debug, Default, Deserialize)]
pub struct HaltRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Execution outcome reported by the executor
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub success: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Abort request
#[derive(Debug, Deserialize)]
pub struct AbortRequest {
    pub reason: String,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// Approve a plan (idempotent)
pub async fn approve_plan(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApprovalRecord>> {
    let plan_id = parse_plan_id(&id)?;
    let record = state.orchestrator.approve(plan_id, &principal.name).await?;
    Ok(Json(record))
}

/// Start executing an approved plan
pub async fn resume_plan(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<Json<Plan>> {
    let plan_id = parse_plan_id(&id)?;
    let plan = state.orchestrator.resume(plan_id, &principal.name).await?;
    Ok(Json(plan))
}

/// Engage the halt. The body is optional.
pub async fn halt(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> ApiResult<Json<StateSnapshot>> {
    let request: HaltRequest = if body.is_empty() {
        HaltRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid halt request: {}", e)))?
    };

    let snapshot = state.orchestrator.halt(&principal.name, request.reason).await?;
    Ok(Json(snapshot))
}

/// Release the halt
pub async fn release_halt(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<StateSnapshot>> {
    Ok(Json(state.orchestrator.release_halt(&principal.name).await?))
}

/// Report the outcome of an executing plan
pub async fn complete_plan(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    body: Result<Json<CompleteRequest>, JsonRejection>,
) -> ApiResult<Json<Plan>> {
    let plan_id = parse_plan_id(&id)?;
    let request = json_body(body)?;
    let plan = state
        .orchestrator
        .complete(plan_id, request.success, request.detail, &principal.name)
        .await?;
    Ok(Json(plan))
}

/// Abort a plan that is not executing
pub async fn abort_plan(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    body: Result<Json<AbortRequest>, JsonRejection>,
) -> ApiResult<Json<Plan>> {
    let plan_id = parse_plan_id(&id)?;
    let request = json_body(body)?;
    let plan = state
        .orchestrator
        .abort(plan_id, &request.reason, &principal.name)
        .await?;
    Ok(Json(plan))
}

/// Reset every confidence penalty to neutral
pub async fn reset_penalties(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<StateSnapshot>> {
    Ok(Json(state.orchestrator.reset_penalties(&principal.name).await?))
}
