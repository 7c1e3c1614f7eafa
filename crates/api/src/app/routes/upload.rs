use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, FromRequest, Multipart, Request},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};

use booking_infra::RecordKind;

use crate::app::dto::UploadResponse;
use crate::app::errors;
use crate::app::services::AppServices;

/// Form field carrying the CSV file in a multipart upload.
pub const UPLOAD_FIELD: &str = "file";

pub async fn upload_members(
    Extension(services): Extension<Arc<AppServices>>,
    request: Request,
) -> Response {
    ingest(&services, Some(RecordKind::Members), request).await
}

pub async fn upload_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    request: Request,
) -> Response {
    ingest(&services, Some(RecordKind::Inventory), request).await
}

/// Kind is detected from the CSV header row.
pub async fn upload_auto(
    Extension(services): Extension<Arc<AppServices>>,
    request: Request,
) -> Response {
    ingest(&services, None, request).await
}

async fn ingest(services: &AppServices, kind: Option<RecordKind>, request: Request) -> Response {
    let csv = match read_csv(request).await {
        Ok(csv) => csv,
        Err(response) => return response,
    };
    match services.ingest(kind, &csv).await {
        Ok(report) => (StatusCode::CREATED, Json(UploadResponse::from(report))).into_response(),
        Err(e) => errors::ingest_error_to_response(e),
    }
}

/// The CSV payload: the `file` field of a multipart form, or the raw body
/// for any other content type.
async fn read_csv(request: Request) -> Result<Bytes, Response> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if !is_multipart {
        return Bytes::from_request(request, &())
            .await
            .map_err(IntoResponse::into_response);
    }

    let mut form = Multipart::from_request(request, &())
        .await
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_input", e.body_text()))?;
    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_input", e.body_text()))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            return field.bytes().await.map_err(|e| {
                errors::json_error(StatusCode::BAD_REQUEST, "invalid_input", e.body_text())
            });
        }
    }
    Err(errors::json_error(
        StatusCode::BAD_REQUEST,
        "invalid_input",
        format!("multipart form has no `{UPLOAD_FIELD}` field"),
    ))
}
