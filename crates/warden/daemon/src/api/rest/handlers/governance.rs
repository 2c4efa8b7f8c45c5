//! Public governance reads

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use warden_audit::{AuditEventType, AuditPage, AuditQuery, DEFAULT_LIMIT, MAX_LIMIT};
use warden_core::{Intent, IntentId, IntentStatus, Page, Plan, PlanFilter, PlanId, PlanStatus, StateSnapshot, Window};

/// Pagination and filters for registry listings
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub status: Option<String>,
    pub intent_id: Option<String>,
}

/// Audit log query parameters
#[derive(Debug, Default, Deserialize)]
pub struct AuditParams {
    pub limit: Option<usize>,
    pub cursor: Option<u64>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub actor: Option<String>,
    pub subject: Option<String>,
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    query
        .map(|Query(params)| params)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn window(params: &ListParams) -> ApiResult<Window> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    Ok(Window {
        offset: params.offset.unwrap_or(0),
        limit,
    })
}

fn parse_status<T: DeserializeOwned>(value: &str) -> ApiResult<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| ApiError::BadRequest(format!("unknown status '{}'", value)))
}

pub(crate) fn parse_plan_id(id: &str) -> ApiResult<PlanId> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid plan id '{}'", id)))
}

/// Orchestrator state summary
pub async fn orchestrator_state(State(state): State<AppState>) -> ApiResult<Json<StateSnapshot>> {
    Ok(Json(state.orchestrator.state().await?))
}

/// List intents in submission order
pub async fn list_intents(
    State(state): State<AppState>,
    query: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Page<Intent>>> {
    let params = query_params(query)?;
    let window = window(&params)?;
    let status = params
        .status
        .as_deref()
        .map(parse_status::<IntentStatus>)
        .transpose()?;

    Ok(Json(state.orchestrator.list_intents(status, window).await))
}

/// List plans in registration order
pub async fn list_plans(
    State(state): State<AppState>,
    query: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Page<Plan>>> {
    let params = query_params(query)?;
    let window = window(&params)?;
    let filter = PlanFilter {
        status: params
            .status
            .as_deref()
            .map(parse_status::<PlanStatus>)
            .transpose()?,
        intent_id: params
            .intent_id
            .as_deref()
            .map(|id| {
                id.parse::<IntentId>()
                    .map_err(|_| ApiError::BadRequest(format!("invalid intent id '{}'", id)))
            })
            .transpose()?,
    };

    Ok(Json(state.orchestrator.list_plans(&filter, window).await))
}

/// Get a single plan
pub async fn get_plan(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Plan>> {
    let plan_id = parse_plan_id(&id)?;
    Ok(Json(state.orchestrator.get_plan(plan_id).await?))
}

/// Page through the audit log
pub async fn audit_log(
    State(state): State<AppState>,
    query: Result<Query<AuditParams>, QueryRejection>,
) -> ApiResult<Json<AuditPage>> {
    let params = query_params(query)?;

    let mut builder = AuditQuery::builder().limit(params.limit.unwrap_or(DEFAULT_LIMIT));
    if let Some(event_type) = params.event_type.as_deref() {
        builder = builder.event_type(event_type.parse::<AuditEventType>()?);
    }
    if let Some(cursor) = params.cursor {
        builder = builder.cursor(cursor);
    }
    if let Some(actor) = params.actor {
        builder = builder.actor_id(actor);
    }
    if let Some(subject) = params.subject {
        builder = builder.subject(subject);
    }

    let page = state.orchestrator.audit_log().query(&builder.build()).await?;
    Ok(Json(page))
}
