use axum::{Router, routing::post};

pub mod booking;
pub mod system;
pub mod upload;

/// Booking endpoints; open to any caller.
pub fn public_router() -> Router {
    Router::new()
        .route("/book", post(booking::book))
        .route("/cancel", post(booking::cancel))
}

/// Bulk-ingestion endpoints; guarded by the API key.
pub fn protected_router() -> Router {
    Router::new()
        .route("/members", post(upload::upload_members))
        .route("/inventory", post(upload::upload_inventory))
        .route("/upload", post(upload::upload_auto))
}
