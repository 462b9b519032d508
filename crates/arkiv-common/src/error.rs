//! Error types shared across Arkiv crates

use thiserror::Error;

/// Result type alias for common Arkiv operations
pub type Result<T> = std::result::Result<T, ArkivError>;

/// Main error type for shared Arkiv functionality
#[derive(Error, Debug)]
pub enum ArkivError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Cannot convert '{value}' to {field_type}")]
    Conversion { value: String, field_type: String },

    #[error("Value '{value}' has no entry in the value mapping")]
    UnmappedValue { value: String },

    #[error("Configuration error: {0}")]
    Config(String),
}
