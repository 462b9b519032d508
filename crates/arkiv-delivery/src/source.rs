//! Collaborators that supply metadata and table data

use arkiv_common::{CandidateKey, DataSource, DataValue, Row, Table};
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{DeliveryError, Result};
use crate::validation::canonical::KeyValue;

/// A batch of rows of one table, in stream order
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Target name of the table
    pub table: String,
    pub rows: Vec<Row>,
    /// Set on the final chunk of the table's stream
    pub end_of_data: bool,
}

/// Ordered chunks of one table
pub type ChunkStream = BoxStream<'static, Result<Chunk>>;

/// Supplies the description of the data to deliver
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn get_data_source(&self) -> Result<DataSource>;
}

/// Supplies table data, and optionally a live query interface over it
#[async_trait]
pub trait DataRepository: Send + Sync {
    /// Stream the rows of a table
    ///
    /// The stream yields zero or more chunks and ends with exactly one chunk
    /// whose `end_of_data` is set.
    async fn get_data_for_target_table(
        &self,
        table_name: &str,
        data_source: &DataSource,
    ) -> Result<ChunkStream>;

    /// Open a live query interface; repositories without one return
    /// [`DeliveryError::NotSupported`]
    async fn data_queryer(&self) -> Result<Box<dyn DataQueryer>> {
        Err(DeliveryError::NotSupported(
            "repository has no live query interface".to_string(),
        ))
    }
}

/// Counts key matches without loading whole tables into memory
///
/// A queryer is opened per validation call and dropped afterwards.
#[async_trait]
pub trait DataQueryer: Send + Sync {
    /// Number of rows of `table` whose `key` equals `value` and whose fields
    /// also satisfy `extra_criteria`
    async fn count_matching_candidate_key_values(
        &self,
        table: &Table,
        key: &CandidateKey,
        extra_criteria: &ExtraCriteria,
        value: &KeyValue,
    ) -> Result<u64>;
}

/// Additional field-equality filters passed along with a key lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraCriteria {
    criteria: Vec<(String, DataValue)>,
}

impl ExtraCriteria {
    pub fn push(&mut self, field: impl Into<String>, value: DataValue) {
        self.criteria.push((field.into(), value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataValue)> {
        self.criteria.iter().map(|(f, v)| (f.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Whether `row` of `table` satisfies every criterion
    pub fn matches(&self, table: &Table, row: &Row) -> bool {
        self.iter().all(|(field, expected)| {
            table
                .value(row, field)
                .is_some_and(|actual| actual.canonical() == expected.canonical())
        })
    }
}
