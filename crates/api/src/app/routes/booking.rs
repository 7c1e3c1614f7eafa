use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query, rejection::JsonRejection, rejection::QueryRejection},
    http::StatusCode,
    response::IntoResponse,
};

use booking_core::{BookingReference, DomainError, EntityKind, InventoryItemId, MemberId};

use crate::app::dto::{BookRequest, BookingView, CancelQuery};
use crate::app::errors;
use crate::app::services::AppServices;

pub async fn book(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<BookRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_input", rejection.body_text());
        }
    };

    match services
        .book(MemberId::new(body.member_id), InventoryItemId::new(body.inventory_id))
        .await
    {
        Ok(booking) => (StatusCode::OK, Json(BookingView::from(booking))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<CancelQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_input", rejection.body_text());
        }
    };

    // A reference that cannot be parsed cannot name an active booking.
    let reference: BookingReference = match query.booking_reference.parse() {
        Ok(r) => r,
        Err(_) => {
            return errors::domain_error_to_response(DomainError::not_found(
                EntityKind::ActiveBooking,
            ));
        }
    };

    match services.cancel(reference).await {
        Ok(booking) => (StatusCode::OK, Json(BookingView::from(booking))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
