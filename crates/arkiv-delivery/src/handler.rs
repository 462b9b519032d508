//! Exception handling seam
//!
//! The orchestrator never decides on its own whether a failed table is
//! retried; it asks the [`ExceptionHandler`]. Reporting and logging of
//! delivery failures happen here as well.

use dashmap::DashMap;
use tracing::{error, warn};

use crate::error::{DeliveryError, ErrorKind};

/// Default number of retries per table granted by [`LoggingExceptionHandler`]
pub const DEFAULT_MAX_RETRIES_PER_TABLE: u32 = 3;

pub trait ExceptionHandler: Send + Sync {
    /// Report an error that ends the run; no decision is requested
    fn handle(&self, error: &DeliveryError);

    /// Report a per-table data error and decide whether to retry the table
    fn handle_with_retry(&self, table: &str, error: &DeliveryError) -> bool;
}

/// Logs every error and retries each table a bounded number of times
#[derive(Debug)]
pub struct LoggingExceptionHandler {
    max_retries: u32,
    retry_validation_errors: bool,
    retries: DashMap<String, u32>,
}

impl Default for LoggingExceptionHandler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES_PER_TABLE)
    }
}

impl LoggingExceptionHandler {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_validation_errors: false,
            retries: DashMap::new(),
        }
    }

    /// Also retry integrity violations; useful when the source is corrected
    /// while the delivery runs
    pub fn retry_validation_errors(mut self, retry: bool) -> Self {
        self.retry_validation_errors = retry;
        self
    }

    pub fn retries(&self, table: &str) -> u32 {
        self.retries.get(table).map(|r| *r).unwrap_or(0)
    }
}

impl ExceptionHandler for LoggingExceptionHandler {
    fn handle(&self, error: &DeliveryError) {
        error!(kind = ?error.kind(), error = %error, "Delivery aborted");
    }

    fn handle_with_retry(&self, table: &str, error: &DeliveryError) -> bool {
        let retryable = match error.kind() {
            ErrorKind::Validation => self.retry_validation_errors,
            kind => kind.is_recoverable(),
        };

        let mut used = self.retries.entry(table.to_string()).or_insert(0);
        if retryable && *used < self.max_retries {
            *used += 1;
            warn!(
                table = %table,
                retry = *used,
                max_retries = self.max_retries,
                error = %error,
                "Table failed, retrying"
            );
            true
        } else {
            error!(table = %table, kind = ?error.kind(), error = %error, "Table rejected");
            false
        }
    }
}
