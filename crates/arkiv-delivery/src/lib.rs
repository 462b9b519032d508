//! Arkiv Delivery Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streams tabular archival data from a source, validates every chunk
//! against the foreign keys and candidate keys of its metadata, and hands the
//! validated tables to an archive version.
//!
//! # Components
//!
//! - **Orchestrator**: [`DeliveryOrchestrator`] runs one delivery per
//!   [`DeliveryCommand`], table by table, with bounded concurrency and
//!   handler-driven retries
//! - **Validators**: [`validation::ForeignKeyValidator`] and
//!   [`validation::CandidateKeyValidator`], wrapped through
//!   [`validation::dispatch`]
//! - **Collaborators**: traits in [`source`], [`archive`], [`handler`] and
//!   [`events`], with in-memory ([`memory`]) and file-based ([`file`])
//!   implementations
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use arkiv_delivery::file::{CsvDataRepository, DirectoryArchive, JsonMetadataSource};
//! use arkiv_delivery::{DeliveryConfig, DeliveryOrchestrator, LoggingExceptionHandler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DeliveryConfig::from_env()?;
//!     let orchestrator = DeliveryOrchestrator::new(
//!         Arc::new(JsonMetadataSource::new("./delivery/metadata.json")),
//!         Arc::new(CsvDataRepository::new("./delivery/data")),
//!         Arc::new(DirectoryArchive::new("./archive")),
//!         Arc::new(LoggingExceptionHandler::new(config.max_table_retries)),
//!     )
//!     .with_key_validators();
//!
//!     let report = orchestrator.execute(&config.to_command()).await?;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod file;
pub mod handler;
pub mod memory;
pub mod orchestrator;
pub mod rows;
pub mod source;
pub mod validation;

pub use archive::ArchiveVersion;
pub use command::{CandidateKeyValidationCommand, DeliveryCommand, ForeignKeyValidationCommand};
pub use config::DeliveryConfig;
pub use error::{DeliveryError, ErrorKind, MetadataError, Result, ValidationError};
pub use events::{DeliveryListener, RowValidated, TracingListener, ValidationListener};
pub use handler::{ExceptionHandler, LoggingExceptionHandler};
pub use orchestrator::{DeliveryOrchestrator, DeliveryReport, TableOutcome, TableReport};
pub use rows::RowsByTable;
pub use source::{Chunk, ChunkStream, DataQueryer, DataRepository, ExtraCriteria, MetadataSource};
