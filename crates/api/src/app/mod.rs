//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and the engine/ingestor facade
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: services::AppServices) -> Router {
    let auth_state = middleware::AuthState {
        api_key: Arc::new(services.api_key().clone()),
    };
    let services = Arc::new(services);

    let protected = routes::protected_router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::api_key_middleware,
    ));

    let api = routes::public_router()
        .merge(protected)
        .layer(Extension(services));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api", api)
        .layer(ServiceBuilder::new())
}
