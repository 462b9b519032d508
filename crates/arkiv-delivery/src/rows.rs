//! In-flight rows of a delivery
//!
//! [`RowsByTable`] holds the rows a table worker has accumulated so far,
//! keyed by table target name, together with the data source they belong to.
//! Validators read from it and may drop rows through [`RowsByTable::remove_rows`].

use arkiv_common::{DataSource, Row, Table};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct TableRows {
    rows: Vec<Row>,
    /// Index of the first row of the most recent chunk
    chunk_start: usize,
    chunks: usize,
}

/// Rows accumulated for the tables of one worker
#[derive(Debug)]
pub struct RowsByTable {
    data_source: Arc<DataSource>,
    tables: BTreeMap<String, TableRows>,
}

impl RowsByTable {
    pub fn new(data_source: Arc<DataSource>) -> Self {
        Self {
            data_source,
            tables: BTreeMap::new(),
        }
    }

    pub fn data_source(&self) -> &Arc<DataSource> {
        &self.data_source
    }

    /// Append the rows of a newly received chunk
    pub fn append_chunk(&mut self, table: &str, rows: Vec<Row>) {
        let entry = self.tables.entry(table.to_string()).or_default();
        entry.chunk_start = entry.rows.len();
        entry.chunks += 1;
        entry.rows.extend(rows);
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.data_source.table(name)
    }

    /// All rows seen so far for `table`
    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(|t| t.rows.as_slice()).unwrap_or_default()
    }

    /// Rows of the most recent chunk for `table`
    pub fn latest_chunk(&self, table: &str) -> &[Row] {
        self.tables
            .get(table)
            .map(|t| &t.rows[t.chunk_start..])
            .unwrap_or_default()
    }

    /// Position of the latest chunk's first row within [`RowsByTable::rows`]
    pub fn latest_chunk_offset(&self, table: &str) -> usize {
        self.tables.get(table).map(|t| t.chunk_start).unwrap_or(0)
    }

    /// Whether the latest chunk is the first one received for `table`
    pub fn is_first_chunk(&self, table: &str) -> bool {
        self.tables.get(table).map(|t| t.chunks <= 1).unwrap_or(true)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    /// Remove rows by their index in [`RowsByTable::rows`]
    ///
    /// Unknown and duplicate indices are ignored. Returns the number of rows
    /// removed.
    pub fn remove_rows(&mut self, table: &str, indices: &[usize]) -> usize {
        let Some(entry) = self.tables.get_mut(table) else {
            return 0;
        };

        let mut doomed = indices.to_vec();
        doomed.sort_unstable();
        doomed.dedup();
        doomed.retain(|&i| i < entry.rows.len());

        let removed_before_chunk = doomed.iter().filter(|&&i| i < entry.chunk_start).count();

        let mut index = 0;
        let mut next = doomed.iter().peekable();
        entry.rows.retain(|_| {
            let remove = next.peek().is_some_and(|&&i| i == index);
            if remove {
                next.next();
            }
            index += 1;
            !remove
        });

        entry.chunk_start -= removed_before_chunk;
        doomed.len()
    }
}
