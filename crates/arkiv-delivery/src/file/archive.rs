use arkiv_common::checksum::Checksum;
use arkiv_common::DataSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;
use uuid::Uuid;

use super::io_error;
use crate::archive::ArchiveVersion;
use crate::error::{DeliveryError, Result};
use crate::rows::RowsByTable;

pub const METADATA_FILE: &str = "metadata.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const TABLES_DIR: &str = "tables";

/// Index of an archive directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub package_id: Uuid,
    pub name: String,
    pub tables: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub table: String,
    /// Path relative to the archive directory
    pub file: String,
    pub rows: usize,
    pub checksum: Checksum,
    pub correlation_token: Uuid,
    pub archived_at: DateTime<Utc>,
}

/// Writes an archive version into a directory
#[derive(Debug)]
pub struct DirectoryArchive {
    root: PathBuf,
    data_source: Mutex<Option<Arc<DataSource>>>,
    /// Serializes manifest rewrites of concurrent table workers
    manifest: tokio::sync::Mutex<Vec<ManifestEntry>>,
}

impl DirectoryArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            data_source: Mutex::new(None),
            manifest: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_source(&self) -> Result<Arc<DataSource>> {
        self.data_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DeliveryError::repository("archive has no data source"))
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| io_error(path, e))
    }
}

#[async_trait]
impl ArchiveVersion for DirectoryArchive {
    fn set_data_source(&self, data_source: Arc<DataSource>) {
        *self.data_source.lock().unwrap_or_else(PoisonError::into_inner) = Some(data_source);
    }

    async fn archive_metadata(&self) -> Result<()> {
        let data_source = self.data_source()?;
        let json = serde_json::to_vec_pretty(data_source.as_ref()).map_err(|e| DeliveryError::Repository(e.into()))?;
        let path = self.root.join(METADATA_FILE);
        self.write(&path, &json).await?;
        info!(path = %path.display(), "Metadata archived");
        Ok(())
    }

    async fn archive_table_data(&self, rows: &RowsByTable, correlation_token: Uuid) -> Result<()> {
        let data_source = self.data_source()?;

        let mut entries = Vec::new();
        for table in rows.table_names() {
            let mut lines = Vec::new();
            for row in rows.rows(&table) {
                serde_json::to_writer(&mut lines, row).map_err(|e| DeliveryError::Repository(e.into()))?;
                lines.push(b'\n');
            }

            let file = format!("{}/{}.jsonl", TABLES_DIR, table);
            self.write(&self.root.join(&file), &lines).await?;

            entries.push(ManifestEntry {
                rows: rows.row_count(&table),
                checksum: Checksum::from_bytes(&lines),
                table,
                file,
                correlation_token,
                archived_at: Utc::now(),
            });
        }

        let mut manifest = self.manifest.lock().await;
        for entry in entries {
            manifest.retain(|e| e.table != entry.table);
            manifest.push(entry);
        }

        let document = Manifest {
            package_id: data_source.package_id,
            name: data_source.name.clone(),
            tables: manifest.clone(),
        };
        let json = serde_json::to_vec_pretty(&document).map_err(|e| DeliveryError::Repository(e.into()))?;
        self.write(&self.root.join(MANIFEST_FILE), &json).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use arkiv_common::{DataValue, Field, Row, Table};

    #[tokio::test]
    async fn test_writes_metadata_tables_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DirectoryArchive::new(dir.path());
        let data_source = Arc::new(DataSource::new(
            "registry",
            vec![Table::new("persons", vec![Field::integer("id"), Field::text("name")])],
        ));

        archive.set_data_source(Arc::clone(&data_source));
        archive.archive_metadata().await.unwrap();

        let mut rows = RowsByTable::new(Arc::clone(&data_source));
        rows.append_chunk(
            "persons",
            vec![
                Row::new(vec![DataValue::Integer(1), "Ada".into()]),
                Row::new(vec![DataValue::Integer(2), DataValue::Null]),
            ],
        );
        let token = Uuid::new_v4();
        archive.archive_table_data(&rows, token).await.unwrap();

        let metadata: DataSource =
            serde_json::from_slice(&std::fs::read(dir.path().join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!(metadata, *data_source);

        let table_file = dir.path().join("tables/persons.jsonl");
        let contents = std::fs::read_to_string(&table_file).unwrap();
        assert_eq!(contents, "[1,\"Ada\"]\n[2,null]\n");

        let manifest: Manifest =
            serde_json::from_slice(&std::fs::read(dir.path().join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest.package_id, data_source.package_id);
        assert_eq!(manifest.tables.len(), 1);
        assert_eq!(manifest.tables[0].rows, 2);
        assert_eq!(manifest.tables[0].correlation_token, token);
        manifest.tables[0].checksum.verify_file(&table_file).unwrap();
    }

    #[tokio::test]
    async fn test_metadata_requires_data_source() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DirectoryArchive::new(dir.path());
        assert!(archive.archive_metadata().await.is_err());
    }
}
