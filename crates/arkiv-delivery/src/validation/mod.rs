//! Key validation engine
//!
//! Validators check the rows of a delivery against the keys declared in the
//! metadata. Each validator declares the command type it understands; the
//! orchestrator only sees them through [`DispatchValidator`], which filters
//! on that type at runtime:
//!
//! ```ignore
//! let validators = vec![
//!     dispatch(ForeignKeyValidator::new(repository.clone())),
//!     dispatch(CandidateKeyValidator::new(repository.clone())),
//! ];
//! ```

pub mod cache;
pub mod candidate_key;
pub mod canonical;
pub mod foreign_key;

pub use cache::{CacheEntry, KeyValueCache, Preload, MAX_CACHED_VALUES};
pub use candidate_key::CandidateKeyValidator;
pub use canonical::{dictionary_name, KeyValue, ResolvedKey};
pub use foreign_key::ForeignKeyValidator;

use arkiv_common::Table;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

use crate::command::{CommandType, DeliveryCommand};
use crate::error::{DeliveryError, Result};
use crate::events::{RowValidated, ValidationListener};
use crate::rows::RowsByTable;
use crate::source::{DataQueryer, DataRepository};

/// A validator bound to one command type
#[async_trait]
pub trait Validator: Send + Sync {
    /// Command type that enables this validator
    type Command: CommandType;

    fn name(&self) -> &str;

    /// Validate the rows received so far for `target`
    ///
    /// Called once per chunk. `end_of_data` is set on the table's final
    /// chunk. Validators may drop rows from `rows`.
    async fn validate(
        &self,
        target: &Table,
        rows: &mut RowsByTable,
        end_of_data: bool,
        command: &Self::Command,
    ) -> Result<()>;

    /// Drop per-table state once an attempt on `target` is over
    ///
    /// Called after every attempt, whether it passed, failed, or ended early
    /// because another validator failed.
    fn finish_table(&self, _target: &Table) {}
}

#[async_trait]
impl<V: Validator> Validator for Arc<V> {
    type Command = V::Command;

    fn name(&self) -> &str {
        self.as_ref().name()
    }

    async fn validate(
        &self,
        target: &Table,
        rows: &mut RowsByTable,
        end_of_data: bool,
        command: &Self::Command,
    ) -> Result<()> {
        self.as_ref().validate(target, rows, end_of_data, command).await
    }

    fn finish_table(&self, target: &Table) {
        self.as_ref().finish_table(target)
    }
}

/// Uniform view over validators with different command types
#[async_trait]
pub trait DispatchValidator: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(
        &self,
        target: &Table,
        rows: &mut RowsByTable,
        end_of_data: bool,
        command: &DeliveryCommand,
    ) -> Result<()>;

    /// See [`Validator::finish_table`]; forwarded regardless of the command
    fn finish_table(&self, target: &Table);
}

/// Runs the wrapped validator only when its command type is present
#[derive(Debug)]
pub struct Dispatch<V> {
    validator: V,
}

impl<V: Validator> Dispatch<V> {
    pub fn new(validator: V) -> Self {
        Self { validator }
    }

    pub fn inner(&self) -> &V {
        &self.validator
    }
}

#[async_trait]
impl<V: Validator> DispatchValidator for Dispatch<V> {
    fn name(&self) -> &str {
        self.validator.name()
    }

    async fn validate(
        &self,
        target: &Table,
        rows: &mut RowsByTable,
        end_of_data: bool,
        command: &DeliveryCommand,
    ) -> Result<()> {
        match V::Command::select(command) {
            Some(selected) => {
                self.validator
                    .validate(target, rows, end_of_data, selected)
                    .await
            }
            None => {
                trace!(validator = self.validator.name(), "No matching command, skipping");
                Ok(())
            }
        }
    }

    fn finish_table(&self, target: &Table) {
        self.validator.finish_table(target)
    }
}

/// Wrap a validator for the orchestrator
pub fn dispatch<V: Validator + 'static>(validator: V) -> Arc<dyn DispatchValidator> {
    Arc::new(Dispatch::new(validator))
}

/// Open the repository's live query interface, if it has one
pub(crate) async fn open_queryer(
    repository: &dyn DataRepository,
) -> Result<Option<Box<dyn DataQueryer>>> {
    match repository.data_queryer().await {
        Ok(queryer) => Ok(Some(queryer)),
        Err(DeliveryError::NotSupported(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

pub(crate) fn notify_row(listeners: &[Arc<dyn ValidationListener>], event: RowValidated<'_>) {
    for listener in listeners {
        listener.row_validated(&event);
    }
}
