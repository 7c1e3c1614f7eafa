//! CSV bulk loading of members and inventory items.
//!
//! Ingestion writes straight into the store; no booking rules apply. Rows that
//! cannot be decoded or carry an unparseable date are skipped and counted,
//! never aborting the batch.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use booking_domain::{NewInventoryItem, NewMember};

use crate::store::{EntityStore, StoreError};

const MEMBER_DATE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const INVENTORY_DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Error)]
pub enum IngestError {
    /// The header row matches neither record kind (or not the requested one).
    #[error("unsupported CSV columns: {}", columns.join(", "))]
    UnsupportedColumns { columns: Vec<String> },

    /// The header row itself could not be read.
    #[error("malformed CSV: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which entity a CSV file holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Members,
    Inventory,
}

impl RecordKind {
    /// Infer the kind from a header row: `name` + `surname` means members,
    /// `title` + `description` means inventory.
    pub fn detect<'a>(headers: impl IntoIterator<Item = &'a str>) -> Result<Self, IngestError> {
        let columns: Vec<String> = headers
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
        let has = |name: &str| columns.iter().any(|c| c == name);

        if has("name") && has("surname") {
            Ok(RecordKind::Members)
        } else if has("title") && has("description") {
            Ok(RecordKind::Inventory)
        } else {
            Err(IngestError::UnsupportedColumns { columns })
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::Members => "members",
            RecordKind::Inventory => "inventory items",
        }
    }
}

/// Outcome of one ingestion batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub kind: RecordKind,
    pub inserted: usize,
    pub skipped: usize,
}

/// Loads CSV batches into an [`EntityStore`].
#[derive(Debug, Clone)]
pub struct Ingestor<S> {
    store: S,
}

impl<S> Ingestor<S>
where
    S: EntityStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Ingest `bytes`, inferring the record kind from the header row.
    pub async fn ingest_auto(&self, bytes: &[u8]) -> Result<IngestReport, IngestError> {
        let headers = read_headers(bytes)?;
        let kind = RecordKind::detect(headers.iter())?;
        self.ingest(kind, bytes).await
    }

    /// Ingest `bytes` as records of `kind`.
    ///
    /// All rows of the batch are inserted in one store transaction.
    #[instrument(skip(self, bytes), fields(kind = kind.label(), bytes = bytes.len()), err)]
    pub async fn ingest(&self, kind: RecordKind, bytes: &[u8]) -> Result<IngestReport, IngestError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(bytes);
        let headers = reader
            .headers()
            .map_err(|e| IngestError::Malformed(e.to_string()))?
            .clone();
        let detected = RecordKind::detect(headers.iter())?;
        if detected != kind {
            return Err(IngestError::UnsupportedColumns {
                columns: headers.iter().map(str::to_string).collect(),
            });
        }
        let columns = Columns::new(&headers);

        let mut tx = self.store.begin().await?;
        let mut report = IngestReport {
            kind,
            inserted: 0,
            skipped: 0,
        };

        for (index, record) in reader.records().enumerate() {
            // Header is line 1.
            let line = index + 2;
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(line, error = %e, "skipping undecodable CSV row");
                    report.skipped += 1;
                    continue;
                }
            };

            let inserted = match kind {
                RecordKind::Members => match member_from_record(&columns, &record) {
                    Ok(member) => tx.insert_member(member).await.map(|_| ()),
                    Err(reason) => {
                        tracing::warn!(line, reason, "skipping member row");
                        report.skipped += 1;
                        continue;
                    }
                },
                RecordKind::Inventory => match item_from_record(&columns, &record) {
                    Ok(item) => tx.insert_item(item).await.map(|_| ()),
                    Err(reason) => {
                        tracing::warn!(line, reason, "skipping inventory row");
                        report.skipped += 1;
                        continue;
                    }
                },
            };
            inserted?;
            report.inserted += 1;
        }

        tx.commit().await?;
        tracing::info!(
            inserted = report.inserted,
            skipped = report.skipped,
            "ingestion batch committed"
        );
        Ok(report)
    }
}

fn read_headers(bytes: &[u8]) -> Result<StringRecord, IngestError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| IngestError::Malformed(e.to_string()))?;
    Ok(headers.clone())
}

/// Header positions, looked up case-insensitively.
struct Columns {
    names: Vec<String>,
}

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        Self {
            names: headers.iter().map(|h| h.to_ascii_lowercase()).collect(),
        }
    }

    /// The trimmed value of `column`, or `""` when the column or cell is absent.
    fn get<'r>(&self, record: &'r StringRecord, column: &str) -> &'r str {
        self.names
            .iter()
            .position(|n| n == column)
            .and_then(|i| record.get(i))
            .map(str::trim)
            .unwrap_or("")
    }
}

fn member_from_record(columns: &Columns, record: &StringRecord) -> Result<NewMember, &'static str> {
    let date_joined =
        parse_member_date(columns.get(record, "date_joined")).ok_or("unparseable date_joined")?;
    let member = NewMember::new(
        columns.get(record, "name"),
        columns.get(record, "surname"),
        date_joined,
    );

    let supplied = parse_count(columns.get(record, "booking_count"));
    if supplied != member.booking_count {
        tracing::info!(
            supplied,
            "ignoring booking_count from CSV; new members start with no bookings"
        );
    }
    Ok(member)
}

fn item_from_record(
    columns: &Columns,
    record: &StringRecord,
) -> Result<NewInventoryItem, &'static str> {
    let expiration_date = parse_inventory_date(columns.get(record, "expiration_date"))
        .ok_or("unparseable expiration_date")?;
    let description = columns.get(record, "description");

    Ok(NewInventoryItem {
        title: columns.get(record, "title").to_string(),
        description: (!description.is_empty()).then(|| description.to_string()),
        remaining_count: parse_count(columns.get(record, "remaining_count")),
        expiration_date,
    })
}

/// Parse `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DDTHH:MM:SS`, read as UTC.
pub fn parse_member_date(raw: &str) -> Option<DateTime<Utc>> {
    MEMBER_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
        .map(|dt| dt.and_utc())
}

/// Parse `DD/MM/YYYY`.
pub fn parse_inventory_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), INVENTORY_DATE_FORMAT).ok()
}

/// Non-numeric and negative counts read as 0.
pub fn parse_count(raw: &str) -> i64 {
    raw.trim().parse::<i64>().map(|n| n.max(0)).unwrap_or(0)
}
