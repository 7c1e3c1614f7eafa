use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use booking_auth::ApiKey;
use booking_core::{BookingReference, InventoryItemId, MemberId};
use booking_domain::{Booking, CancelBooking, CreateBooking};
use booking_infra::{
    BookingEngine, DEFAULT_RETRY_ATTEMPTS, EngineError, EntityStore, IngestError, IngestReport,
    Ingestor, InMemoryEntityStore, PostgresEntityStore, RecordKind, with_retry,
};

use crate::config::ApiConfig;

/// Everything a handler needs, shared behind an `Arc`.
pub struct AppServices {
    engine: BookingEngine<Arc<dyn EntityStore>>,
    ingestor: Ingestor<Arc<dyn EntityStore>>,
    api_key: ApiKey,
    retry_attempts: usize,
}

impl AppServices {
    pub fn new(store: Arc<dyn EntityStore>, api_key: ApiKey) -> Self {
        Self {
            engine: BookingEngine::new(store.clone()),
            ingestor: Ingestor::new(store),
            api_key,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }

    /// In-memory services (dev/test).
    pub fn in_memory(api_key: ApiKey) -> Self {
        Self::new(Arc::new(InMemoryEntityStore::new()), api_key)
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    /// Create a booking stamped with the current time, retrying storage
    /// conflicts.
    pub async fn book(
        &self,
        member_id: MemberId,
        item_id: InventoryItemId,
    ) -> Result<Booking, EngineError> {
        let cmd = CreateBooking {
            member_id,
            item_id,
            requested_at: Utc::now(),
        };
        let engine = &self.engine;
        with_retry(self.retry_attempts, || engine.create_booking(cmd.clone())).await
    }

    pub async fn cancel(&self, reference: BookingReference) -> Result<Booking, EngineError> {
        let cmd = CancelBooking {
            reference,
            requested_at: Utc::now(),
        };
        let engine = &self.engine;
        with_retry(self.retry_attempts, || engine.cancel_booking(cmd.clone())).await
    }

    /// Ingest a CSV batch; `None` detects the kind from the header row.
    pub async fn ingest(
        &self,
        kind: Option<RecordKind>,
        bytes: &[u8],
    ) -> Result<IngestReport, IngestError> {
        match kind {
            Some(kind) => self.ingestor.ingest(kind, bytes).await,
            None => self.ingestor.ingest_auto(bytes).await,
        }
    }
}

/// Wire services from configuration: Postgres when `DATABASE_URL` is set,
/// otherwise the in-memory store.
pub async fn build_services(config: &ApiConfig) -> Result<AppServices> {
    let api_key = ApiKey::new(config.api_key.clone());

    let Some(url) = config.database_url.as_deref() else {
        tracing::info!("using in-memory entity store");
        return Ok(AppServices::new(
            Arc::new(InMemoryEntityStore::with_lock_timeout(config.lock_timeout)),
            api_key,
        ));
    };

    let store = PostgresEntityStore::connect(url, config.db_max_connections, config.lock_timeout)
        .await
        .context("failed to connect to Postgres")?;
    store
        .migrate()
        .await
        .context("failed to apply database schema")?;
    tracing::info!("using Postgres entity store");
    Ok(AppServices::new(Arc::new(store), api_key))
}
