//! Arkiv Delivery - validate and archive a tabular data delivery

use anyhow::{bail, Context, Result};
use arkiv_common::logging::{init_logging, LogConfig, LogLevel};
use arkiv_delivery::file::{CsvDataRepository, DirectoryArchive, JsonMetadataSource};
use arkiv_delivery::validation::{dispatch, CandidateKeyValidator, ForeignKeyValidator};
use arkiv_delivery::{DeliveryConfig, DeliveryOrchestrator, LoggingExceptionHandler, TracingListener};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "arkiv-delivery")]
#[command(author, version, about = "Validate and archive a tabular data delivery")]
struct Cli {
    /// Metadata document describing the delivery (JSON)
    #[arg(short, long, env = "ARKIV_METADATA")]
    metadata: PathBuf,

    /// Directory with one `<table>.csv` file per table
    #[arg(short, long, env = "ARKIV_DATA_DIR")]
    data_dir: PathBuf,

    /// Output directory of the archive version
    #[arg(short, long, env = "ARKIV_ARCHIVE_DIR", default_value = "./archive")]
    archive_dir: PathBuf,

    /// Validate only, write nothing to the archive
    #[arg(long)]
    validation_only: bool,

    /// Deliver a single table (target or source name)
    #[arg(short, long)]
    table: Option<String>,

    /// Tables processed concurrently
    #[arg(long)]
    tables_simultaneously: Option<usize>,

    /// Drop rows whose foreign key has no referenced row
    #[arg(long)]
    remove_orphans: bool,

    /// Skip tables without candidate keys instead of failing the run
    #[arg(long)]
    allow_tables_without_keys: bool,

    /// Rows per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Override the package identifier of the metadata
    #[arg(long)]
    package_id: Option<Uuid>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("arkiv-delivery")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let mut config = DeliveryConfig::from_env()?;
    if let Some(tables) = cli.tables_simultaneously {
        config.tables_simultaneously = tables;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    config.remove_orphans |= cli.remove_orphans;
    config.require_candidate_key &= !cli.allow_tables_without_keys;
    config.validate()?;

    let mut command = config.to_command().validation_only(cli.validation_only);
    if let Some(table) = cli.table {
        command = command.with_target_table(table);
    }
    command.package_id = cli.package_id;

    info!(
        metadata = %cli.metadata.display(),
        data_dir = %cli.data_dir.display(),
        archive_dir = %cli.archive_dir.display(),
        "Starting delivery"
    );

    let repository = Arc::new(CsvDataRepository::new(&cli.data_dir).with_chunk_size(config.chunk_size));
    let listener = Arc::new(TracingListener);

    let orchestrator = DeliveryOrchestrator::new(
        Arc::new(JsonMetadataSource::new(&cli.metadata)),
        repository.clone(),
        Arc::new(DirectoryArchive::new(&cli.archive_dir)),
        Arc::new(LoggingExceptionHandler::new(config.max_table_retries)),
    )
    .with_validator(dispatch(
        ForeignKeyValidator::new(repository.clone()).with_listener(listener.clone()),
    ))
    .with_validator(dispatch(
        CandidateKeyValidator::new(repository).with_listener(listener.clone()),
    ))
    .with_listener(listener)
    .with_max_table_retries(config.max_table_retries);

    let report = orchestrator
        .execute(&command)
        .await
        .context("Delivery failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    let rejected = report.rejected().count();
    if rejected > 0 {
        bail!("{} of {} table(s) rejected", rejected, report.tables.len());
    }

    info!("Delivery complete");
    Ok(())
}
