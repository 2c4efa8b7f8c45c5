//! Intent submission

use crate::api::rest::auth::Principal;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{body::Bytes, extract::State, http::StatusCode, Extension, Json};
use warden_core::Submission;

/// Validate, queue and compose an intent
pub async fn submit_intent(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Submission>)> {
    let raw: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("body is not valid JSON: {}", e)))?;

    let submission = state
        .orchestrator
        .submit_intent(&raw, &principal.name)
        .await?;

    tracing::info!(
        intent_id = %submission.intent_id,
        principal = %principal.name,
        plans = submission.plan_ids.len(),
        "Accepted intent"
    );

    Ok((StatusCode::ACCEPTED, Json(submission)))
}
