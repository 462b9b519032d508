//! Arkiv Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Arkiv workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error type and result alias
//! - **Checksums**: Integrity digests for archived files
//! - **Logging**: Centralized `tracing` subscriber setup
//! - **Types**: The archival metadata model (data sources, tables, keys) and
//!   the row/value model streamed through a delivery
//!
//! # Example
//!
//! ```no_run
//! use arkiv_common::{Result, ArkivError};
//! use arkiv_common::checksum::Checksum;
//!
//! fn check_table_file(path: &str) -> Result<()> {
//!     let checksum = Checksum::from_file(path)?;
//!     println!("Table file checksum: {}", checksum);
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ArkivError, Result};
pub use types::{
    CandidateKey, DataSource, DataValue, Field, FieldType, ForeignKey, KeyField, KeyReference,
    Row, Table, ValueMapping, NULL_CANONICAL,
};
