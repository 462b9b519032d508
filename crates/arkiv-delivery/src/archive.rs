//! Archive-version sink

use arkiv_common::DataSource;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::rows::RowsByTable;

/// Persists an archive version: its metadata once, then validated table data
#[async_trait]
pub trait ArchiveVersion: Send + Sync {
    /// Set once per run, before any table is processed
    fn set_data_source(&self, data_source: Arc<DataSource>);

    async fn archive_metadata(&self) -> Result<()>;

    /// Persist the validated rows of a table
    ///
    /// `correlation_token` is opaque to the archive and identifies this
    /// hand-over in logs and manifests.
    async fn archive_table_data(&self, rows: &RowsByTable, correlation_token: Uuid) -> Result<()>;
}
