//! Error types for the delivery pipeline
//!
//! Errors fall into two families. Fatal errors (bad metadata, bad arguments,
//! repository I/O failures, listener failures) abort a delivery run. Data
//! errors (conversion, mapping, integrity violations and anything
//! unclassified) are offered to the exception handler, which decides whether
//! the affected table is retried.

use arkiv_common::{ArkivError, Row};
use thiserror::Error;

/// Result type alias for delivery operations
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Classification used by the orchestrator to pick a recovery path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Argument,
    Metadata,
    Repository,
    Listener,
    Conversion,
    Mapping,
    Validation,
    Unclassified,
}

impl ErrorKind {
    /// Whether the error is local to one table and may be retried
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::Conversion | ErrorKind::Mapping | ErrorKind::Validation | ErrorKind::Unclassified
        )
    }
}

/// Main error type of a delivery run
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Repository error: {0:#}")]
    Repository(anyhow::Error),

    #[error("Listener failed: {0:#}")]
    Listener(anyhow::Error),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("{0:#}")]
    Unclassified(anyhow::Error),
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::Argument(_) => ErrorKind::Argument,
            DeliveryError::Metadata(_) => ErrorKind::Metadata,
            DeliveryError::Repository(_) | DeliveryError::NotSupported(_) => ErrorKind::Repository,
            DeliveryError::Listener(_) => ErrorKind::Listener,
            DeliveryError::Conversion(_) => ErrorKind::Conversion,
            DeliveryError::Mapping(_) => ErrorKind::Mapping,
            DeliveryError::Validation(_) => ErrorKind::Validation,
            DeliveryError::Unclassified(_) => ErrorKind::Unclassified,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }

    pub fn repository(message: impl std::fmt::Display) -> Self {
        DeliveryError::Repository(anyhow::anyhow!("{}", message))
    }
}

impl From<ArkivError> for DeliveryError {
    fn from(err: ArkivError) -> Self {
        match err {
            ArkivError::Conversion { .. } => DeliveryError::Conversion(err.to_string()),
            ArkivError::UnmappedValue { .. } => DeliveryError::Mapping(err.to_string()),
            ArkivError::Config(msg) => DeliveryError::Argument(msg),
            other => DeliveryError::Repository(other.into()),
        }
    }
}

/// Key or field configuration that cannot be validated against
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Table '{0}' is not part of the data source")]
    UnknownTable(String),

    #[error("Foreign key '{foreign_key}' on table '{table}' references unknown candidate key '{key}' on table '{referenced_table}'")]
    UnresolvedReference {
        table: String,
        foreign_key: String,
        referenced_table: String,
        key: String,
    },

    #[error("Foreign key '{foreign_key}' on table '{table}' has {fields} field(s) but referenced candidate key '{key}' has {key_fields}")]
    ArityMismatch {
        table: String,
        foreign_key: String,
        fields: usize,
        key: String,
        key_fields: usize,
    },

    #[error("Key '{key}' on table '{table}' has no fields")]
    EmptyKey { table: String, key: String },

    #[error("Key '{key}' on table '{table}' names unknown field '{field}'")]
    UnknownField {
        table: String,
        key: String,
        field: String,
    },

    #[error("Table '{0}' declares no candidate keys")]
    NoCandidateKeys(String),
}

/// Rows that violate a uniqueness or referential constraint
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Foreign key '{foreign_key}' on table '{table}': value ({value}) has no matching row in '{referenced_table}' ({} row(s))", .rows.len())]
    MissingRelationship {
        table: String,
        foreign_key: String,
        referenced_table: String,
        value: String,
        rows: Vec<Row>,
    },

    #[error("Foreign key '{foreign_key}' on table '{table}': value ({value}) matches {matches} rows in '{referenced_table}' ({} row(s))", .rows.len())]
    TooManyRelationships {
        table: String,
        foreign_key: String,
        referenced_table: String,
        value: String,
        matches: u64,
        rows: Vec<Row>,
    },

    #[error("Candidate key '{key}' on table '{table}': value ({value}) is not unique")]
    UniquenessViolation {
        table: String,
        key: String,
        value: String,
        row: Row,
    },
}

impl ValidationError {
    pub fn table(&self) -> &str {
        match self {
            ValidationError::MissingRelationship { table, .. }
            | ValidationError::TooManyRelationships { table, .. }
            | ValidationError::UniquenessViolation { table, .. } => table,
        }
    }
}
