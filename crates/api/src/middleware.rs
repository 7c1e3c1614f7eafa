use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use booking_auth::ApiKey;

use crate::app::errors;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AuthState {
    pub api_key: Arc<ApiKey>,
}

/// Reject requests whose `x-api-key` header does not carry the shared secret.
pub async fn api_key_middleware(
    State(state): State<AuthState>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let supplied = extract_api_key(req.headers());

    if let Err(e) = state.api_key.verify(supplied) {
        tracing::warn!(path = %req.uri().path(), reason = %e, "rejected unauthenticated request");
        return Err(errors::json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            e.to_string(),
        ));
    }

    Ok(next.run(req).await)
}

fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER)?.to_str().ok()
}
