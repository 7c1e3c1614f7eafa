//! Tracing and logging (shared setup for the server and the import CLI).

/// Initialize process-wide observability with JSON logs.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize with human-readable output (used by the CLI).
pub fn init_pretty() {
    tracing::init(LogFormat::Pretty);
}

/// Output format of the fmt subscriber.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Tracing configuration (filters, layers).
pub mod tracing;
