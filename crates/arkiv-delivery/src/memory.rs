//! In-memory collaborators
//!
//! Used by tests and by embedders that already hold their data in memory.
//! The repository counts fetches and queries so callers can observe how the
//! validators use it.

use arkiv_common::{CandidateKey, DataSource, Row, Table};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

use crate::archive::ArchiveVersion;
use crate::error::{DeliveryError, Result};
use crate::rows::RowsByTable;
use crate::source::{Chunk, ChunkStream, DataQueryer, DataRepository, ExtraCriteria, MetadataSource};
use crate::validation::canonical::{KeyValue, ResolvedKey};

/// Default number of rows per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Default)]
struct RepositoryState {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    queries: AtomicUsize,
}

impl RepositoryState {
    fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

/// Table rows held in memory, keyed by target name
#[derive(Debug)]
pub struct InMemoryRepository {
    state: Arc<RepositoryState>,
    chunk_size: usize,
    queryable: bool,
    fetches: DashMap<String, usize>,
    failing: Mutex<HashSet<String>>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RepositoryState::default()),
            chunk_size: DEFAULT_CHUNK_SIZE,
            queryable: false,
            fetches: DashMap::new(),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Offer a live query interface
    pub fn queryable(mut self, queryable: bool) -> Self {
        self.queryable = queryable;
        self
    }

    /// Replace the rows of a table
    pub fn insert_rows(&self, table: impl Into<String>, rows: Vec<Row>) {
        self.state
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.into(), rows);
    }

    /// Make every fetch of `table` fail with a repository error
    pub fn fail_table(&self, table: impl Into<String>) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.into());
    }

    /// Number of times `table` was streamed
    pub fn fetch_count(&self, table: &str) -> usize {
        self.fetches.get(table).map(|c| *c).unwrap_or(0)
    }

    /// Number of key lookups answered by queryers of this repository
    pub fn query_count(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataRepository for InMemoryRepository {
    async fn get_data_for_target_table(
        &self,
        table_name: &str,
        _data_source: &DataSource,
    ) -> Result<ChunkStream> {
        *self.fetches.entry(table_name.to_string()).or_default() += 1;

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(table_name);
        if failing {
            return Err(DeliveryError::repository(format!(
                "table '{}' is unavailable",
                table_name
            )));
        }

        let rows = self.state.rows(table_name);
        Ok(stream::iter(split_into_chunks(table_name, rows, self.chunk_size).into_iter().map(Ok)).boxed())
    }

    async fn data_queryer(&self) -> Result<Box<dyn DataQueryer>> {
        if !self.queryable {
            return Err(DeliveryError::NotSupported(
                "in-memory repository is not queryable".to_string(),
            ));
        }
        Ok(Box::new(InMemoryQueryer {
            state: Arc::clone(&self.state),
        }))
    }
}

/// Split rows into chunks; the last one (possibly empty) ends the stream
pub fn split_into_chunks(table: &str, rows: Vec<Row>, chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut rows = rows.into_iter().peekable();

    loop {
        let batch: Vec<Row> = rows.by_ref().take(chunk_size).collect();
        let end_of_data = rows.peek().is_none();
        if batch.is_empty() && !chunks.is_empty() {
            break;
        }
        chunks.push(Chunk {
            table: table.to_string(),
            rows: batch,
            end_of_data,
        });
        if end_of_data {
            break;
        }
    }
    chunks
}

/// Counts key matches over an [`InMemoryRepository`]
#[derive(Debug)]
pub struct InMemoryQueryer {
    state: Arc<RepositoryState>,
}

#[async_trait]
impl DataQueryer for InMemoryQueryer {
    async fn count_matching_candidate_key_values(
        &self,
        table: &Table,
        key: &CandidateKey,
        extra_criteria: &ExtraCriteria,
        value: &KeyValue,
    ) -> Result<u64> {
        self.state.queries.fetch_add(1, Ordering::SeqCst);
        let resolved = ResolvedKey::resolve(table, &key.name, &key.fields)?;

        let mut matches = 0;
        for row in self.state.rows(table.target_name()) {
            if resolved.value(&row)? == *value && extra_criteria.matches(table, &row) {
                matches += 1;
            }
        }
        Ok(matches)
    }
}

/// Hands out a fixed data source
#[derive(Debug)]
pub struct StaticMetadataSource {
    data_source: Option<DataSource>,
    calls: AtomicUsize,
}

impl StaticMetadataSource {
    pub fn new(data_source: DataSource) -> Self {
        Self {
            data_source: Some(data_source),
            calls: AtomicUsize::new(0),
        }
    }

    /// A source whose every call fails
    pub fn failing() -> Self {
        Self {
            data_source: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for StaticMetadataSource {
    async fn get_data_source(&self) -> Result<DataSource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.data_source
            .clone()
            .ok_or_else(|| DeliveryError::repository("metadata is unavailable"))
    }
}

/// Rows of one table as handed to [`InMemoryArchive`]
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedTable {
    pub table: String,
    pub rows: Vec<Row>,
    pub correlation_token: Uuid,
}

/// Records everything written to it
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    data_source: Mutex<Option<Arc<DataSource>>>,
    metadata_writes: AtomicUsize,
    tables: Mutex<Vec<ArchivedTable>>,
    fail_metadata: bool,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// An archive whose metadata write fails
    pub fn failing_metadata() -> Self {
        Self {
            fail_metadata: true,
            ..Self::default()
        }
    }

    pub fn data_source(&self) -> Option<Arc<DataSource>> {
        self.data_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn metadata_writes(&self) -> usize {
        self.metadata_writes.load(Ordering::SeqCst)
    }

    pub fn archived_tables(&self) -> Vec<ArchivedTable> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn archived(&self, table: &str) -> Option<ArchivedTable> {
        self.archived_tables().into_iter().find(|t| t.table == table)
    }
}

#[async_trait]
impl ArchiveVersion for InMemoryArchive {
    fn set_data_source(&self, data_source: Arc<DataSource>) {
        *self.data_source.lock().unwrap_or_else(PoisonError::into_inner) = Some(data_source);
    }

    async fn archive_metadata(&self) -> Result<()> {
        if self.fail_metadata {
            return Err(DeliveryError::repository("archive rejected metadata"));
        }
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn archive_table_data(&self, rows: &RowsByTable, correlation_token: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        for table in rows.table_names() {
            tables.push(ArchivedTable {
                rows: rows.rows(&table).to_vec(),
                table,
                correlation_token,
            });
        }
        Ok(())
    }
}
