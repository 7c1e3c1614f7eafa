//! Infrastructure layer: entity stores, the booking engine and CSV ingestion.

pub mod engine;
pub mod ingest;
pub mod store;


pub use engine::{BookingEngine, DEFAULT_RETRY_ATTEMPTS, EngineError, with_retry};
pub use ingest::{IngestError, IngestReport, Ingestor, RecordKind};
pub use store::{
    BookingFilter, EntityStore, InMemoryEntityStore, PostgresEntityStore, StoreError,
    StoreTransaction,
};
