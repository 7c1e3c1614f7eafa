use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use booking_domain::Booking;
use booking_infra::IngestReport;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct BookRequest {
    pub member_id: i64,
    pub inventory_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    pub booking_reference: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct BookingView {
    pub id: i64,
    pub reference: String,
    pub member_id: i64,
    pub item_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Booking> for BookingView {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id.get(),
            reference: b.reference.to_string(),
            member_id: b.member_id.get(),
            item_id: b.item_id.get(),
            is_active: b.is_active,
            created_at: b.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub rows_processed: usize,
    pub rows_skipped: usize,
}

impl From<IngestReport> for UploadResponse {
    fn from(r: IngestReport) -> Self {
        Self {
            message: format!("Uploaded {} {}.", r.inserted, r.kind.label()),
            rows_processed: r.inserted,
            rows_skipped: r.skipped,
        }
    }
}
