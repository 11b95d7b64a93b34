//! Schema context sources

use async_trait::async_trait;
use std::path::PathBuf;

use super::SchemaSource;
use crate::{Error, Result};

/// Schema context known up front
pub struct StaticSchema(pub String);

#[async_trait]
impl SchemaSource for StaticSchema {
    async fn fetch(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Schema context read from a file on every fetch
pub struct FileSchemaSource {
    path: PathBuf,
}

impl FileSchemaSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SchemaSource for FileSchemaSource {
    async fn fetch(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read schema {:?}: {}", self.path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_schema_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.sql");
        std::fs::write(&path, "CREATE TABLE orders (id INT);").unwrap();

        let source = FileSchemaSource::new(&path);
        assert!(source.fetch().await.unwrap().contains("orders"));

        let missing = FileSchemaSource::new(dir.path().join("missing.sql"));
        assert!(matches!(missing.fetch().await, Err(Error::Config(_))));
    }
}
