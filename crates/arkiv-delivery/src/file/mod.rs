//! File-based collaborators
//!
//! - [`JsonMetadataSource`]: the data source description as one JSON document
//! - [`CsvDataRepository`]: one `<target name>.csv` file per table, with a
//!   header row naming the fields
//! - [`DirectoryArchive`]: `metadata.json`, one JSON Lines file per table
//!   under `tables/`, and a `manifest.json` with SHA-256 checksums

pub mod archive;
pub mod metadata;
pub mod repository;

pub use archive::{DirectoryArchive, Manifest, ManifestEntry};
pub use metadata::JsonMetadataSource;
pub use repository::CsvDataRepository;

use std::path::Path;

use crate::error::DeliveryError;

/// Repository error carrying the offending path
pub(crate) fn io_error(path: &Path, err: impl Into<anyhow::Error>) -> DeliveryError {
    DeliveryError::Repository(err.into().context(format!("{}", path.display())))
}
