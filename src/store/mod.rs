//! Keyed record stores
//!
//! The credential and token stores (see [`credentials`] and [`tokens`])
//! sit on top of a small repository trait so the core logic is independent
//! of the backing format: an in-memory map for tests, a whole-file-rewrite
//! JSON Lines file for production.
//!
//! The file store offers no atomicity beyond "a whole-file replace" —
//! every mutation reads all records, modifies the set, and rewrites the
//! file. Callers needing check-then-act atomicity must serialize access
//! themselves (the coordinator actor's command loop does exactly that).

pub mod credentials;
pub mod tokens;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::AppError;

/// Trait for keyed record backends
#[async_trait]
pub trait RecordStore<R>: Send + Sync
where
    R: Clone + Send + Sync + 'static,
{
    /// Fetch the record stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<R>, AppError>;

    /// Insert or replace the record under `key`.
    async fn put(&self, key: &str, record: R) -> Result<(), AppError>;

    /// Remove the record under `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Enumerate all records.
    async fn scan(&self) -> Result<Vec<(String, R)>, AppError>;
}

/// In-memory implementation, used in tests and as a no-persistence mode.
pub struct MemoryStore<R> {
    records: Mutex<HashMap<String, R>>,
}

impl<R> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl<R> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> RecordStore<R> for MemoryStore<R>
where
    R: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<R>, AppError> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, record: R) -> Result<(), AppError> {
        self.records.lock().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.records.lock().await.remove(key).is_some())
    }

    async fn scan(&self) -> Result<Vec<(String, R)>, AppError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// One line of the backing file.
#[derive(Serialize, Deserialize)]
struct Entry<R> {
    key: String,
    record: R,
}

/// Flat-file implementation: one JSON document per line, whole-file
/// rewrite on every mutation.
pub struct JsonFileStore<R> {
    path: PathBuf,
    // serializes read-modify-write cycles against this file
    guard: Mutex<()>,
    _marker: std::marker::PhantomData<R>,
}

impl<R> JsonFileStore<R>
where
    R: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            guard: Mutex::new(()),
            _marker: std::marker::PhantomData,
        }
    }

    async fn load_all(&self) -> Result<HashMap<String, R>, AppError> {
        let mut records = HashMap::new();
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let entry: Entry<R> = serde_json::from_str(line)?;
            records.insert(entry.key, entry.record);
        }
        Ok(records)
    }

    async fn save_all(&self, records: &HashMap<String, R>) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut out = String::new();
        for (key, record) in records {
            let entry = Entry {
                key: key.clone(),
                record: record.clone(),
            };
            out.push_str(&serde_json::to_string(&entry)?);
            out.push('\n');
        }
        // whole-file replace via rename
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, out).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl<R> RecordStore<R> for JsonFileStore<R>
where
    R: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<R>, AppError> {
        let _guard = self.guard.lock().await;
        Ok(self.load_all().await?.remove(key))
    }

    async fn put(&self, key: &str, record: R) -> Result<(), AppError> {
        let _guard = self.guard.lock().await;
        let mut records = self.load_all().await?;
        records.insert(key.to_string(), record);
        self.save_all(&records).await
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let _guard = self.guard.lock().await;
        let mut records = self.load_all().await?;
        let existed = records.remove(key).is_some();
        if existed {
            self.save_all(&records).await?;
        }
        Ok(existed)
    }

    async fn scan(&self) -> Result<Vec<(String, R)>, AppError> {
        let _guard = self.guard.lock().await;
        Ok(self.load_all().await?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Probe {
        n: u32,
    }

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryStore::new();
        assert!(store.get("a").await.unwrap().is_none());

        store.put("a", Probe { n: 1 }).await.unwrap();
        store.put("b", Probe { n: 2 }).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(Probe { n: 1 }));

        store.put("a", Probe { n: 3 }).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(Probe { n: 3 }));

        assert_eq!(store.scan().await.unwrap().len(), 2);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");

        let store = JsonFileStore::new(&path);
        store.put("alice", Probe { n: 7 }).await.unwrap();
        store.put("bob", Probe { n: 8 }).await.unwrap();
        store.delete("bob").await.unwrap();

        // fresh instance reads the rewritten file
        let reopened: JsonFileStore<Probe> = JsonFileStore::new(&path);
        assert_eq!(reopened.get("alice").await.unwrap(), Some(Probe { n: 7 }));
        assert!(reopened.get("bob").await.unwrap().is_none());
        assert_eq!(reopened.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Probe> = JsonFileStore::new(dir.path().join("absent.jsonl"));
        assert!(store.get("x").await.unwrap().is_none());
        assert!(store.scan().await.unwrap().is_empty());
        assert!(!store.delete("x").await.unwrap());
    }
}
