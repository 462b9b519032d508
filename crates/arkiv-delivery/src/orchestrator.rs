//! Delivery pipeline orchestrator
//!
//! Drives one delivery run end to end:
//!
//! 1. Fetch the data source and apply the package identifier override
//! 2. Hand the data source to the archive and archive its metadata
//! 3. Stream every selected table chunk by chunk through the validators,
//!    up to `tables_handled_simultaneously` tables at a time
//! 4. Archive each table once its final chunk validated
//!
//! Data errors (conversion, mapping, validation, unclassified) are offered to
//! the [`ExceptionHandler`], which decides whether the table is streamed again
//! from scratch. Every other error is reported once and ends the run.

use arkiv_common::{DataSource, Table};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::archive::ArchiveVersion;
use crate::command::DeliveryCommand;
use crate::error::{DeliveryError, ErrorKind, Result};
use crate::events::DeliveryListener;
use crate::handler::ExceptionHandler;
use crate::rows::RowsByTable;
use crate::source::{DataRepository, MetadataSource};
use crate::validation::{dispatch, CandidateKeyValidator, DispatchValidator, ForeignKeyValidator};

/// What happened to one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TableOutcome {
    Archived { correlation_token: Uuid },
    /// Validated without archiving (validation-only run)
    Validated,
    /// Dropped after a data error the handler chose not to retry
    Rejected { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub attempts: u32,
    /// Rows left after validation
    pub rows: usize,
    #[serde(flatten)]
    pub outcome: TableOutcome,
}

/// Result of a delivery run, tables in data source order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub package_id: Uuid,
    pub tables: Vec<TableReport>,
}

impl DeliveryReport {
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &TableReport> {
        self.tables
            .iter()
            .filter(|t| matches!(t.outcome, TableOutcome::Rejected { .. }))
    }

    /// Whether no table was rejected
    pub fn is_complete(&self) -> bool {
        self.rejected().next().is_none()
    }
}

/// Runs deliveries against a fixed set of collaborators
pub struct DeliveryOrchestrator {
    metadata: Arc<dyn MetadataSource>,
    repository: Arc<dyn DataRepository>,
    archive: Arc<dyn ArchiveVersion>,
    handler: Arc<dyn ExceptionHandler>,
    validators: Vec<Arc<dyn DispatchValidator>>,
    listeners: Vec<Arc<dyn DeliveryListener>>,
    max_table_retries: Option<u32>,
}

impl DeliveryOrchestrator {
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        repository: Arc<dyn DataRepository>,
        archive: Arc<dyn ArchiveVersion>,
        handler: Arc<dyn ExceptionHandler>,
    ) -> Self {
        Self {
            metadata,
            repository,
            archive,
            handler,
            validators: Vec::new(),
            listeners: Vec::new(),
            max_table_retries: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn DispatchValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Add the foreign key and candidate key validators over this
    /// orchestrator's repository
    pub fn with_key_validators(self) -> Self {
        let foreign_keys = dispatch(ForeignKeyValidator::new(Arc::clone(&self.repository)));
        let candidate_keys = dispatch(CandidateKeyValidator::new(Arc::clone(&self.repository)));
        self.with_validator(foreign_keys).with_validator(candidate_keys)
    }

    pub fn with_listener(mut self, listener: Arc<dyn DeliveryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Stop retrying a table after `retries` retries, whatever the handler says
    pub fn with_max_table_retries(mut self, retries: u32) -> Self {
        self.max_table_retries = Some(retries);
        self
    }

    /// Run one delivery
    #[instrument(skip_all, fields(validation_only = command.validation_only))]
    pub async fn execute(&self, command: &DeliveryCommand) -> Result<DeliveryReport> {
        command.validate().map_err(|e| self.fatal(e))?;

        self.notify(|l| l.before_get_data_source())?;
        let mut data_source = self
            .metadata
            .get_data_source()
            .await
            .map_err(|e| self.fatal(e))?;

        if let Some(package_id) = command.package_id {
            data_source.package_id = package_id;
        }
        let data_source = Arc::new(data_source);
        info!(
            package_id = %data_source.package_id,
            tables = data_source.tables.len(),
            "Starting delivery"
        );

        self.archive.set_data_source(Arc::clone(&data_source));
        self.notify(|l| l.before_archive_metadata(&data_source))?;
        if !command.validation_only {
            self.archive
                .archive_metadata()
                .await
                .map_err(|e| self.fatal(e))?;
        }

        let tables = select_tables(&data_source, command).map_err(|e| self.fatal(e))?;

        let mut reports: Vec<(usize, TableReport)> = stream::iter(tables.into_iter().enumerate())
            .map(|(position, table)| {
                let data_source = Arc::clone(&data_source);
                async move {
                    self.deliver_table(data_source, table, command)
                        .await
                        .map(|report| (position, report))
                }
            })
            .buffer_unordered(command.tables_handled_simultaneously)
            .try_collect()
            .await?;
        reports.sort_by_key(|(position, _)| *position);

        let report = DeliveryReport {
            package_id: data_source.package_id,
            tables: reports.into_iter().map(|(_, report)| report).collect(),
        };
        info!(
            tables = report.tables.len(),
            rejected = report.rejected().count(),
            "Delivery finished"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(table = %table.target_name()))]
    async fn deliver_table(
        &self,
        data_source: Arc<DataSource>,
        table: &Table,
        command: &DeliveryCommand,
    ) -> Result<TableReport> {
        let table_name = table.target_name();
        let mut attempts = 0u32;
        let mut retries = 0u32;

        loop {
            attempts += 1;
            debug!(attempt = attempts, "Streaming table");
            self.notify(|l| l.before_get_data_for_target_table(&data_source, table))?;

            let mut rows = RowsByTable::new(Arc::clone(&data_source));
            let result = self.stream_and_validate(table, &mut rows, command).await;
            for validator in &self.validators {
                validator.finish_table(table);
            }
            let err = match result {
                Ok(()) => return self.archive_table(table, rows, attempts, command).await,
                Err(err) if err.is_recoverable() => err,
                Err(err) => return Err(self.fatal(err)),
            };

            let retry = self.handler.handle_with_retry(table_name, &err);
            let capped = self.max_table_retries.is_some_and(|max| retries >= max);
            if retry && !capped {
                retries += 1;
                warn!(attempt = attempts, error = %err, "Retrying table");
                continue;
            }

            warn!(attempts, error = %err, "Table rejected");
            return Ok(TableReport {
                table: table_name.to_string(),
                attempts,
                rows: rows.row_count(table_name),
                outcome: TableOutcome::Rejected {
                    error: err.to_string(),
                },
            });
        }
    }

    async fn stream_and_validate(
        &self,
        table: &Table,
        rows: &mut RowsByTable,
        command: &DeliveryCommand,
    ) -> Result<()> {
        let table_name = table.target_name();
        let data_source = Arc::clone(rows.data_source());
        let mut chunks = self
            .repository
            .get_data_for_target_table(table_name, &data_source)
            .await?;

        while let Some(chunk) = chunks.try_next().await? {
            if chunk.table != table_name {
                return Err(DeliveryError::repository(format!(
                    "received chunk of table '{}' while streaming '{}'",
                    chunk.table, table_name
                )));
            }

            let end_of_data = chunk.end_of_data;
            rows.append_chunk(table_name, chunk.rows);
            self.notify(|l| l.before_validate_data_in_target_table(table, rows, end_of_data))?;

            for validator in &self.validators {
                validator.validate(table, rows, end_of_data, command).await?;
            }

            if end_of_data {
                return Ok(());
            }
        }

        Err(DeliveryError::repository(format!(
            "stream of table '{}' ended without end of data",
            table_name
        )))
    }

    async fn archive_table(
        &self,
        table: &Table,
        rows: RowsByTable,
        attempts: u32,
        command: &DeliveryCommand,
    ) -> Result<TableReport> {
        let table_name = table.target_name();
        let row_count = rows.row_count(table_name);

        let outcome = if command.validation_only {
            TableOutcome::Validated
        } else {
            self.notify(|l| l.before_archive_data_for_target_table(table, &rows))?;
            let correlation_token = Uuid::new_v4();
            self.archive
                .archive_table_data(&rows, correlation_token)
                .await
                .map_err(|e| self.fatal(e))?;
            info!(rows = row_count, %correlation_token, "Table archived");
            TableOutcome::Archived { correlation_token }
        };

        Ok(TableReport {
            table: table_name.to_string(),
            attempts,
            rows: row_count,
            outcome,
        })
    }

    fn notify<F>(&self, event: F) -> Result<()>
    where
        F: Fn(&dyn DeliveryListener) -> anyhow::Result<()>,
    {
        for listener in &self.listeners {
            event(listener.as_ref()).map_err(DeliveryError::Listener)?;
        }
        Ok(())
    }

    /// Report an error that ends the run
    fn fatal(&self, err: DeliveryError) -> DeliveryError {
        if err.kind() != ErrorKind::Listener {
            self.handler.handle(&err);
        }
        err
    }
}

fn select_tables<'a>(data_source: &'a DataSource, command: &DeliveryCommand) -> Result<Vec<&'a Table>> {
    match command.target_table.as_deref() {
        None => Ok(data_source.tables.iter().collect()),
        Some(name) => data_source
            .table(name)
            .map(|table| vec![table])
            .ok_or_else(|| DeliveryError::Argument(format!("unknown target table '{}'", name))),
    }
}
