use arkiv_common::DataSource;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::io_error;
use crate::error::Result;
use crate::source::MetadataSource;

/// Reads the data source from a JSON file on every call
#[derive(Debug, Clone)]
pub struct JsonMetadataSource {
    path: PathBuf,
}

impl JsonMetadataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetadataSource for JsonMetadataSource {
    async fn get_data_source(&self) -> Result<DataSource> {
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        let data_source: DataSource =
            serde_json::from_str(&json).map_err(|e| io_error(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            tables = data_source.tables.len(),
            "Loaded metadata"
        );
        Ok(data_source)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_reads_data_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        std::fs::write(
            &path,
            r#"{
                "package_id": "0b6c3f59-54a5-4a4e-8f3a-0ad0e5b1c001",
                "name": "municipal records",
                "tables": [{"name": "persons", "fields": [{"name": "id", "type": "integer"}]}]
            }"#,
        )
        .unwrap();

        let data_source = JsonMetadataSource::new(&path).get_data_source().await.unwrap();
        assert_eq!(data_source.name, "municipal records");
        assert!(data_source.table("persons").is_some());
    }

    #[tokio::test]
    async fn test_missing_or_malformed_file_is_repository_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = JsonMetadataSource::new(dir.path().join("absent.json"));
        assert_eq!(missing.get_data_source().await.unwrap_err().kind(), ErrorKind::Repository);

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonMetadataSource::new(&path).get_data_source().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Repository);
        assert!(err.to_string().contains("broken.json"));
    }
}
