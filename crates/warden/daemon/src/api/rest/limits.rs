//! Request shape limits enforced before routing

use crate::config::RequestLimits;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::{header::CONTENT_LENGTH, Method},
    middleware::Next,
    response::Response,
};

/// Reject oversized URLs, header blocks and declared bodies
pub async fn enforce_limits(
    State(limits): State<RequestLimits>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let url_len = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().len())
        .unwrap_or(0);
    if url_len > limits.max_url_bytes {
        return Err(ApiError::UriTooLong(limits.max_url_bytes));
    }

    let header_len: usize = request
        .headers()
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len())
        .sum();
    if header_len > limits.max_header_bytes {
        return Err(ApiError::HeadersTooLarge(limits.max_header_bytes));
    }

    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limits.max_body_bytes) {
        return Err(ApiError::PayloadTooLarge(limits.max_body_bytes));
    }

    Ok(next.run(request).await)
}

/// The public listener is read and submit only
pub async fn reject_mutating_methods(request: Request, next: Next) -> Result<Response, ApiError> {
    match *request.method() {
        Method::PUT | Method::DELETE | Method::PATCH => {
            Err(ApiError::MethodNotAllowed(request.method().to_string()))
        }
        _ => Ok(next.run(request).await),
    }
}
