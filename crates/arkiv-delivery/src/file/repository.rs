use arkiv_common::{DataSource, Row, Table};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::io_error;
use crate::error::{DeliveryError, MetadataError, Result};
use crate::memory::DEFAULT_CHUNK_SIZE;
use crate::source::{Chunk, ChunkStream, DataRepository};

/// Streams tables from `<dir>/<target name>.csv`
///
/// Columns are matched to fields by header name, so column order in the file
/// is free. Conversion failures name the table, line and field. There is no
/// live query interface.
#[derive(Debug, Clone)]
pub struct CsvDataRepository {
    dir: PathBuf,
    chunk_size: usize,
}

impl CsvDataRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn table_path(&self, table_name: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", table_name))
    }
}

#[async_trait]
impl DataRepository for CsvDataRepository {
    async fn get_data_for_target_table(
        &self,
        table_name: &str,
        data_source: &DataSource,
    ) -> Result<ChunkStream> {
        let table = data_source
            .table(table_name)
            .cloned()
            .ok_or_else(|| MetadataError::UnknownTable(table_name.to_string()))?;
        let path = self.table_path(table.target_name());
        let chunk_size = self.chunk_size;

        let cursor = tokio::task::spawn_blocking(move || CsvCursor::open(&path, table, chunk_size))
            .await
            .map_err(|e| DeliveryError::Repository(e.into()))??;

        let chunks = stream::unfold(Some(cursor), |state| async move {
            let cursor = state?;
            let read = tokio::task::spawn_blocking(move || {
                let mut cursor = cursor;
                let chunk = cursor.read_chunk();
                (cursor, chunk)
            })
            .await;

            match read {
                Ok((cursor, Ok(chunk))) => {
                    let next = if chunk.end_of_data { None } else { Some(cursor) };
                    Some((Ok(chunk), next))
                }
                Ok((_, Err(err))) => Some((Err(err), None)),
                Err(join) => Some((Err(DeliveryError::Repository(join.into())), None)),
            }
        });

        Ok(chunks.boxed())
    }
}

/// Position in one table's CSV file
struct CsvCursor {
    path: PathBuf,
    reader: csv::Reader<File>,
    table: Table,
    /// Column of each table field, in field order
    columns: Vec<usize>,
    chunk_size: usize,
}

impl CsvCursor {
    fn open(path: &Path, table: Table, chunk_size: usize) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| io_error(path, e))?;
        let headers = reader.headers().map_err(|e| io_error(path, e))?.clone();

        let columns = table
            .fields
            .iter()
            .map(|field| {
                headers.iter().position(|h| h.trim() == field.name).ok_or_else(|| {
                    DeliveryError::repository(format!(
                        "{}: no column for field '{}' of table '{}'",
                        path.display(),
                        field.name,
                        table.target_name()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(path = %path.display(), table = %table.target_name(), "Opened table file");
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            table,
            columns,
            chunk_size,
        })
    }

    /// Read up to `chunk_size` records; the chunk that hits the end of the
    /// file carries `end_of_data`
    fn read_chunk(&mut self) -> Result<Chunk> {
        let mut rows = Vec::with_capacity(self.chunk_size);
        let mut record = csv::StringRecord::new();
        let mut end_of_data = false;

        while rows.len() < self.chunk_size {
            let more = self
                .reader
                .read_record(&mut record)
                .map_err(|e| io_error(&self.path, e))?;
            if !more {
                end_of_data = true;
                break;
            }
            rows.push(self.convert(&record)?);
        }

        Ok(Chunk {
            table: self.table.target_name().to_string(),
            rows,
            end_of_data,
        })
    }

    fn convert(&self, record: &csv::StringRecord) -> Result<Row> {
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        self.table
            .fields
            .iter()
            .zip(&self.columns)
            .map(|(field, &column)| {
                let raw = record.get(column).unwrap_or("");
                field.field_type.parse(raw).map_err(|e| {
                    DeliveryError::Conversion(format!(
                        "{} line {} field '{}': {}",
                        self.table.target_name(),
                        line,
                        field.name,
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Row::new)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use arkiv_common::{DataValue, Field};
    use futures::TryStreamExt;

    fn data_source() -> DataSource {
        DataSource::new(
            "ds",
            vec![Table::new("persons", vec![Field::integer("id"), Field::text("name")])],
        )
    }

    async fn read_all(repository: &CsvDataRepository) -> Result<Vec<Chunk>> {
        repository
            .get_data_for_target_table("persons", &data_source())
            .await?
            .try_collect()
            .await
    }

    #[tokio::test]
    async fn test_reads_chunks_by_header_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("persons.csv"), "name,id\nAda,1\nBo,2\nCy,\n").unwrap();

        let repository = CsvDataRepository::new(dir.path()).with_chunk_size(2);
        let chunks = read_all(&repository).await.unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(!chunks[0].end_of_data);
        assert!(chunks[1].end_of_data);
        assert_eq!(chunks[0].rows[0], Row::new(vec![DataValue::Integer(1), "Ada".into()]));
        assert_eq!(chunks[1].rows[0], Row::new(vec![DataValue::Null, "Cy".into()]));
    }

    #[tokio::test]
    async fn test_conversion_error_names_line_and_field() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("persons.csv"), "id,name\n1,Ada\nx,Bo\n").unwrap();

        let err = read_all(&CsvDataRepository::new(dir.path())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conversion);
        let message = err.to_string();
        assert!(message.contains("line 3"), "{message}");
        assert!(message.contains("'id'"), "{message}");
    }

    #[tokio::test]
    async fn test_missing_file_or_column_is_repository_error() {
        let dir = tempfile::tempdir().unwrap();
        let repository = CsvDataRepository::new(dir.path());
        assert_eq!(read_all(&repository).await.unwrap_err().kind(), ErrorKind::Repository);

        std::fs::write(dir.path().join("persons.csv"), "id\n1\n").unwrap();
        assert_eq!(read_all(&repository).await.unwrap_err().kind(), ErrorKind::Repository);
        assert!(matches!(
            repository.data_queryer().await,
            Err(DeliveryError::NotSupported(_))
        ));
    }
}
