//! API Router configuration

use super::auth::{self, Scope};
use super::handlers;
use super::limits;
use super::state::AppState;
use crate::config::GatewayConfig;
use crate::error::ApiError;
use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

fn guarded(routes: Router<AppState>, state: &AppState, scope: Scope) -> Router<AppState> {
    routes.route_layer(middleware::from_fn_with_state((state.clone(), scope), auth::authorize))
}

fn cors(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
}

async fn not_found() -> ApiError {
    ApiError::NotFound("no such route".to_string())
}

/// Public listener: intent submission, governance reads and health checks
pub fn public_router(state: AppState, gateway: &GatewayConfig) -> Router {
    let submit = guarded(
        Router::new().route("/intent", post(handlers::submit_intent)),
        &state,
        Scope::IntentSubmit,
    );

    let read = guarded(
        Router::new()
            .route("/governance/orchestrator-state", get(handlers::orchestrator_state))
            .route("/governance/intents", get(handlers::list_intents))
            .route("/governance/plans", get(handlers::list_plans))
            .route("/governance/plans/:plan_id", get(handlers::get_plan))
            .route("/governance/audit", get(handlers::audit_log)),
        &state,
        Scope::GovernanceRead,
    );

    let health = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz));

    Router::new()
        .merge(submit)
        .merge(read)
        .merge(health)
        .fallback(not_found)
        .layer(middleware::from_fn(limits::reject_mutating_methods))
        .layer(middleware::from_fn_with_state(
            gateway.limits.clone(),
            limits::enforce_limits,
        ))
        .layer(RequestBodyLimitLayer::new(gateway.limits.max_body_bytes))
        .layer(cors(&gateway.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Internal-control listener: approval, execution and halt
pub fn internal_router(state: AppState, gateway: &GatewayConfig) -> Router {
    let control = guarded(
        Router::new()
            .route("/internal/approve/:plan_id", post(handlers::approve_plan))
            .route("/internal/resume/:plan_id", post(handlers::resume_plan))
            .route("/internal/complete/:plan_id", post(handlers::complete_plan))
            .route("/internal/abort/:plan_id", post(handlers::abort_plan))
            .route("/internal/halt", post(handlers::halt))
            .route("/internal/release-halt", post(handlers::release_halt))
            .route("/internal/reset-penalties", post(handlers::reset_penalties)),
        &state,
        Scope::GovernanceControl,
    );

    Router::new()
        .merge(control)
        .route("/healthz", get(handlers::healthz))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            gateway.limits.clone(),
            limits::enforce_limits,
        ))
        .layer(RequestBodyLimitLayer::new(gateway.limits.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, TokenConfig};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use warden_audit::MemoryAuditStore;
    use warden_core::{AgentSpec, Orchestrator, OrchestratorConfig};

    const SUBMITTER: &str = "sk_test_submitter";
    const READER: &str = "sk_test_reader";
    const OPERATOR: &str = "sk_test_operator";

    fn gateway(burst: u32) -> GatewayConfig {
        let token = |principal: &str, plain: &str, scopes: Vec<Scope>| TokenConfig {
            principal: principal.to_string(),
            token_sha256: None,
            token: Some(plain.to_string()),
            scopes,
        };
        GatewayConfig {
            tokens: vec![
                token("ci", SUBMITTER, vec![Scope::IntentSubmit, Scope::GovernanceRead]),
                token("dashboard", READER, vec![Scope::GovernanceRead]),
                token("alice", OPERATOR, vec![Scope::GovernanceControl, Scope::GovernanceRead]),
            ],
            rate_limit: RateLimitConfig {
                requests_per_second: 1.0,
                burst,
            },
            ..Default::default()
        }
    }

    fn routers(burst: u32) -> (Router, Router) {
        let mut config = OrchestratorConfig::default();
        config.composer.agents = vec![
            AgentSpec::Fixed {
                id: "careful".into(),
                confidence: 0.9,
            },
            AgentSpec::Fixed {
                id: "quick".into(),
                confidence: 0.7,
            },
        ];
        let orchestrator = Arc::new(Orchestrator::new(&config, Arc::new(MemoryAuditStore::new())));
        let gateway = gateway(burst);
        let state = AppState::new(orchestrator, &gateway);
        (
            public_router(state.clone(), &gateway),
            internal_router(state, &gateway),
        )
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    fn intent() -> Value {
        json!({"kind": "inspect", "target": "X", "mode": "reason-only", "confidence": 0.8})
    }

    async fn submit(app: &Router) -> Vec<String> {
        let (status, body) = send(app, request("POST", "/intent", Some(SUBMITTER), Some(intent()))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        body["plan_ids"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn health_checks_need_no_token() {
        let (public, _) = routers(10);
        let (status, body) = send(&public, request("GET", "/healthz", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, _) = send(&public, request("GET", "/readyz", None, None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_or_unknown_token_is_401() {
        let (public, _) = routers(10);

        let (status, body) = send(&public, request("POST", "/intent", None, Some(intent()))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "AUTH_INVALID_KEY");
        assert!(body["timestamp"].is_string());

        let (status, _) = send(
            &public,
            request("GET", "/governance/plans", Some("sk_test_nope"), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn scopes_are_enforced_per_route_class() {
        let (public, internal) = routers(10);

        let (status, body) = send(&public, request("POST", "/intent", Some(READER), Some(intent()))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "AUTH_INSUFFICIENT_PERMISSION");

        let plan_ids = submit(&public).await;
        let uri = format!("/internal/approve/{}", plan_ids[0]);
        let (status, _) = send(&internal, request("POST", &uri, Some(SUBMITTER), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&public, request("GET", "/governance/plans", Some(READER), None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn internal_routes_absent_from_public_listener() {
        let (public, _) = routers(10);
        let (status, body) = send(&public, request("POST", "/internal/halt", Some(OPERATOR), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn submit_returns_accepted_with_plans() {
        let (public, _) = routers(10);
        let (status, body) = send(&public, request("POST", "/intent", Some(SUBMITTER), Some(intent()))).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["plan_ids"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_intent_is_422_with_every_violation() {
        let (public, _) = routers(10);
        let (status, body) = send(
            &public,
            request(
                "POST",
                "/intent",
                Some(SUBMITTER),
                Some(json!({"kind": "teleport", "confidence": 3, "surprise": true})),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"kind"));
        assert!(fields.contains(&"target"));
        assert!(fields.contains(&"confidence"));
        assert!(fields.contains(&"surprise"));
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let (public, _) = routers(10);
        let req = Request::builder()
            .method("POST")
            .uri("/intent")
            .header(header::AUTHORIZATION, format!("Bearer {}", SUBMITTER))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&public, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn rate_limit_returns_429_with_retry_after() {
        let (public, _) = routers(2);
        for _ in 0..2 {
            let (status, _) = send(&public, request("GET", "/governance/plans", Some(READER), None)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let resp = public
            .clone()
            .oneshot(request("GET", "/governance/plans", Some(READER), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key(header::RETRY_AFTER));

        // Other keys have their own bucket
        let (status, _) = send(&public, request("GET", "/governance/plans", Some(SUBMITTER), None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn mutating_methods_are_405() {
        let (public, _) = routers(10);
        for method in ["PUT", "DELETE", "PATCH"] {
            let (status, body) = send(&public, request(method, "/intent", Some(SUBMITTER), None)).await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
            assert_eq!(body["code"], "METHOD_NOT_ALLOWED");
        }
    }

    #[tokio::test]
    async fn oversized_requests_are_rejected() {
        let (public, _) = routers(10);

        let long = format!("/governance/plans?intent_id={}", "a".repeat(3000));
        let (status, _) = send(&public, request("GET", &long, Some(READER), None)).await;
        assert_eq!(status, StatusCode::URI_TOO_LONG);

        let req = Request::builder()
            .method("GET")
            .uri("/governance/plans")
            .header(header::AUTHORIZATION, format!("Bearer {}", READER))
            .header("x-padding", "p".repeat(9000))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&public, req).await;
        assert_eq!(status, StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);

        let big = "x".repeat(2 * 1024 * 1024);
        let req = Request::builder()
            .method("POST")
            .uri("/intent")
            .header(header::AUTHORIZATION, format!("Bearer {}", SUBMITTER))
            .header(header::CONTENT_LENGTH, big.len())
            .body(Body::from(big))
            .unwrap();
        let (status, _) = send(&public, req).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn plan_lookup_errors() {
        let (public, _) = routers(10);

        let uri = format!("/governance/plans/{}", uuid::Uuid::new_v4());
        let (status, _) = send(&public, request("GET", &uri, Some(READER), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&public, request("GET", "/governance/plans/plan_42", Some(READER), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &public,
            request("GET", "/governance/plans?status=sleeping", Some(READER), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn approval_gate_end_to_end() {
        let (public, internal) = routers(50);
        let plan_ids = submit(&public).await;
        let second_intent = submit(&public).await;

        // Resume without approval
        let (status, body) = send(
            &internal,
            request("POST", &format!("/internal/resume/{}", plan_ids[0]), Some(OPERATOR), None),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "INVALID_TRANSITION");

        for id in [&plan_ids[0], &second_intent[0]] {
            let uri = format!("/internal/approve/{}", id);
            let (status, body) = send(&internal, request("POST", &uri, Some(OPERATOR), None)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["approver"], "alice");
        }

        // Halted at startup
        let resume = format!("/internal/resume/{}", plan_ids[0]);
        let (status, body) = send(&internal, request("POST", &resume, Some(OPERATOR), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "HALT_ACTIVE");

        let (status, body) = send(&internal, request("POST", "/internal/release-halt", Some(OPERATOR), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["halted"], false);

        let (status, body) = send(&internal, request("POST", &resume, Some(OPERATOR), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "executing");

        let other = format!("/internal/resume/{}", second_intent[0]);
        let (status, body) = send(&internal, request("POST", &other, Some(OPERATOR), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONCURRENT_EXECUTION_REJECTED");

        let complete = format!("/internal/complete/{}", plan_ids[0]);
        let (status, body) = send(
            &internal,
            request("POST", &complete, Some(OPERATOR), Some(json!({"success": true}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");

        let (status, body) = send(
            &public,
            request("GET", "/governance/orchestrator-state", Some(READER), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_executing_plan"], Value::Null);
        assert_eq!(body["intent_count"], 2);

        let (status, body) = send(
            &public,
            request("GET", "/governance/audit?type=execution_rejected", Some(READER), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["events"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn halt_body_is_optional() {
        let (_, internal) = routers(10);
        let (status, body) = send(&internal, request("POST", "/internal/halt", Some(OPERATOR), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["halted"], true);

        let (status, _) = send(
            &internal,
            request("POST", "/internal/halt", Some(OPERATOR), Some(json!({"reason": "drill"}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn abort_requires_reason() {
        let (public, internal) = routers(10);
        let plan_ids = submit(&public).await;
        let uri = format!("/internal/abort/{}", plan_ids[0]);

        let (status, _) = send(&internal, request("POST", &uri, Some(OPERATOR), Some(json!({})))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &internal,
            request("POST", &uri, Some(OPERATOR), Some(json!({"reason": "wrong target"}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "aborted");
    }

    #[tokio::test]
    async fn audit_limit_out_of_range_is_400() {
        let (public, _) = routers(10);
        let (status, _) = send(
            &public,
            request("GET", "/governance/audit?limit=5000", Some(READER), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &public,
            request("GET", "/governance/audit?type=nonsense", Some(READER), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
