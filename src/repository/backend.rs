//! Storage-backend seams.
//!
//! The engine never talks to a database driver directly; the repository
//! variants are written against these two traits. The in-memory
//! implementations back tests and embedded use, the file-backed object store
//! gives durable single-host storage.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use super::RepositoryError;

/// Row-oriented relational seam: keyed rows in named tables, prefix scans
/// ordered by key.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn put(&self, table: &str, key: &str, row: Value) -> Result<(), RepositoryError>;
    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, RepositoryError>;
    async fn scan_prefix(
        &self,
        table: &str,
        prefix: &str,
    ) -> Result<Vec<(String, Value)>, RepositoryError>;
}

/// Append-oriented object seam.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), RepositoryError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RepositoryError>;
}

#[derive(Default)]
pub struct MemoryRelationalStore {
    tables: tokio::sync::RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn put(&self, table: &str, key: &str, row: Value) -> Result<(), RepositoryError> {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), row);
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    async fn scan_prefix(
        &self,
        table: &str,
        prefix: &str,
    ) -> Result<Vec<(String, Value)>, RepositoryError> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: tokio::sync::RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every stored object; lets tests simulate visibility windows.
    pub async fn clear(&self) {
        self.objects.write().await.clear();
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), RepositoryError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        Ok(self.objects.read().await.get(key).cloned())
    }
}

/// Object store over a local directory; object keys map to file paths.
pub struct FileObjectStore {
    dir: PathBuf,
}

impl FileObjectStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Object keys use '/' separators; keep them as directories.
        self.dir.join(key)
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), RepositoryError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RepositoryError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_relational_put_get() {
        let store = MemoryRelationalStore::new();
        store.put("runs", "r1", json!({"id": "r1"})).await.unwrap();
        let row = store.get("runs", "r1").await.unwrap().unwrap();
        assert_eq!(row["id"], "r1");
        assert!(store.get("runs", "r2").await.unwrap().is_none());
        assert!(store.get("other", "r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_relational_scan_ordered() {
        let store = MemoryRelationalStore::new();
        store.put("t", "run/0000000002/b", json!(2)).await.unwrap();
        store.put("t", "run/0000000001/a", json!(1)).await.unwrap();
        store.put("t", "other/0000000001/x", json!(9)).await.unwrap();

        let rows = store.scan_prefix("t", "run/").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].1, json!(1));
        assert_eq!(rows[1].1, json!(2));
    }

    #[tokio::test]
    async fn test_memory_object_roundtrip() {
        let store = MemoryObjectStore::new();
        store.put("a/b.json", b"data".to_vec()).await.unwrap();
        assert_eq!(store.get("a/b.json").await.unwrap().unwrap(), b"data");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_object_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::new(dir.path()).unwrap();
        store
            .put("runs/r1/executions/e1.json", b"payload".to_vec())
            .await
            .unwrap();
        let bytes = store.get("runs/r1/executions/e1.json").await.unwrap().unwrap();
        assert_eq!(bytes, b"payload");
        assert!(store.get("runs/r1/executions/e2.json").await.unwrap().is_none());
    }
}
