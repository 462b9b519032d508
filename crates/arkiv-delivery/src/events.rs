//! Lifecycle and progress notifications
//!
//! Listeners are invoked synchronously and in order. An error returned by a
//! [`DeliveryListener`] is not classified; it ends the run and surfaces from
//! [`crate::DeliveryOrchestrator::execute`].

use arkiv_common::{DataSource, Row, Table};
use tracing::{debug, info, trace};

use crate::rows::RowsByTable;

/// Notifications emitted by the orchestrator as a delivery progresses
#[allow(unused_variables)]
pub trait DeliveryListener: Send + Sync {
    fn before_get_data_source(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn before_archive_metadata(&self, data_source: &DataSource) -> anyhow::Result<()> {
        Ok(())
    }

    /// Emitted once per table and attempt
    fn before_get_data_for_target_table(
        &self,
        data_source: &DataSource,
        table: &Table,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Emitted once per chunk, after the chunk was appended to `rows`
    fn before_validate_data_in_target_table(
        &self,
        table: &Table,
        rows: &RowsByTable,
        end_of_data: bool,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn before_archive_data_for_target_table(
        &self,
        table: &Table,
        rows: &RowsByTable,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A row about to be checked against a key
#[derive(Debug, Clone, Copy)]
pub struct RowValidated<'a> {
    pub table: &'a str,
    pub key: &'a str,
    /// Index of the row among the rows seen so far for `table`
    pub row_index: usize,
    pub row: &'a Row,
}

/// Per-row progress reported by the key validators
pub trait ValidationListener: Send + Sync {
    fn row_validated(&self, event: &RowValidated<'_>);
}

/// Logs lifecycle notifications through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl DeliveryListener for TracingListener {
    fn before_get_data_source(&self) -> anyhow::Result<()> {
        debug!("Fetching data source");
        Ok(())
    }

    fn before_archive_metadata(&self, data_source: &DataSource) -> anyhow::Result<()> {
        info!(
            package_id = %data_source.package_id,
            name = %data_source.name,
            tables = data_source.tables.len(),
            "Archiving metadata"
        );
        Ok(())
    }

    fn before_get_data_for_target_table(
        &self,
        _data_source: &DataSource,
        table: &Table,
    ) -> anyhow::Result<()> {
        info!(table = %table.target_name(), "Fetching table data");
        Ok(())
    }

    fn before_validate_data_in_target_table(
        &self,
        table: &Table,
        rows: &RowsByTable,
        end_of_data: bool,
    ) -> anyhow::Result<()> {
        debug!(
            table = %table.target_name(),
            chunk_rows = rows.latest_chunk(table.target_name()).len(),
            total_rows = rows.row_count(table.target_name()),
            end_of_data,
            "Validating chunk"
        );
        Ok(())
    }

    fn before_archive_data_for_target_table(
        &self,
        table: &Table,
        rows: &RowsByTable,
    ) -> anyhow::Result<()> {
        info!(
            table = %table.target_name(),
            rows = rows.row_count(table.target_name()),
            "Archiving table data"
        );
        Ok(())
    }
}

impl ValidationListener for TracingListener {
    fn row_validated(&self, event: &RowValidated<'_>) {
        trace!(table = %event.table, key = %event.key, row = event.row_index, "Validating row");
    }
}
