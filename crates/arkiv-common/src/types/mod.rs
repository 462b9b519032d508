//! Types shared across Arkiv crates

pub mod metadata;
pub mod value;

pub use metadata::{
    CandidateKey, DataSource, Field, ForeignKey, KeyField, KeyReference, Table, ValueMapping,
};
pub use value::{DataValue, FieldType, Row, NULL_CANONICAL};
