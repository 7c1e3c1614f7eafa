use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use booking_api::config::ApiConfig;
use booking_infra::{Ingestor, PostgresEntityStore};

#[derive(Parser)]
#[command(name = "booking-import", about = "Load a members or inventory CSV into the booking database")]
struct Cli {
    /// CSV file to load; the record kind is detected from its header row.
    #[arg(long)]
    upload_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    booking_observability::init_pretty();

    let cli = Cli::parse();
    let config = ApiConfig::from_env()?;
    let Some(url) = config.database_url.as_deref() else {
        bail!("DATABASE_URL must be set to import into the database");
    };

    let bytes = tokio::fs::read(&cli.upload_file)
        .await
        .with_context(|| format!("failed to read {}", cli.upload_file.display()))?;

    let store = PostgresEntityStore::connect(url, config.db_max_connections, config.lock_timeout)
        .await
        .context("failed to connect to Postgres")?;
    store.migrate().await.context("failed to apply database schema")?;

    let report = Ingestor::new(store)
        .ingest_auto(&bytes)
        .await
        .with_context(|| format!("failed to import {}", cli.upload_file.display()))?;

    println!(
        "Uploaded {} {} from {} ({} rows skipped).",
        report.inserted,
        report.kind.label(),
        cli.upload_file.display(),
        report.skipped
    );
    Ok(())
}
