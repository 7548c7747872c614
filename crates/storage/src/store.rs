//! Object store seam.
//!
//! Objects are whole UTF-8 texts addressed by slash-separated keys. A `put`
//! replaces the object atomically: readers see either the old or the new body.

use async_trait::async_trait;
use footprint_core::{Error, Result};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Backend trait for the durable object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically create or replace an object.
    async fn put(&self, key: &str, body: String) -> Result<()>;

    /// Delete an object. Deleting an absent object succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// In-process store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.objects.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, body: String) -> Result<()> {
        self.objects.lock().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// Store rooted at a local directory; keys map to relative file paths.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let bad_segment = key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
        if bad_segment {
            return Err(Error::storage(format!("invalid object key: {key:?}")));
        }
        Ok(self.root.join(key))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel.iter().map(|p| p.to_str()).collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, body: String) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write beside the target, then rename over it.
        let tmp = path.with_file_name(format!(
            ".{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("object"),
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                    continue;
                }
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
                if hidden {
                    continue;
                }
                if let Some(key) = self.key_for(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn backend_type(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a/b").await.unwrap(), None);

        store.put("a/b", "one".to_string()).await.unwrap();
        store.put("a/c", "two".to_string()).await.unwrap();
        store.put("z", "three".to_string()).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap().as_deref(), Some("one"));
        assert_eq!(store.list("a/").await.unwrap(), vec!["a/b", "a/c"]);

        store.delete("a/b").await.unwrap();
        store.delete("missing").await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store
            .put("footprint/BBCA/1m/2024/03/05/02.jsonl", "x\n".to_string())
            .await
            .unwrap();
        store
            .put("footprint/BBCA/1m/2024/03/05/02.jsonl", "y\n".to_string())
            .await
            .unwrap();
        assert_eq!(
            store.get("footprint/BBCA/1m/2024/03/05/02.jsonl").await.unwrap().as_deref(),
            Some("y\n")
        );
        assert_eq!(store.get("footprint/none.jsonl").await.unwrap(), None);

        store.put("raw_trades/2024-03-05/02/1_a.jsonl", "r".to_string()).await.unwrap();
        assert_eq!(
            store.list("footprint/").await.unwrap(),
            vec!["footprint/BBCA/1m/2024/03/05/02.jsonl"]
        );
        assert_eq!(store.list("").await.unwrap().len(), 2);

        store.delete("footprint/BBCA/1m/2024/03/05/02.jsonl").await.unwrap();
        store.delete("footprint/BBCA/1m/2024/03/05/02.jsonl").await.unwrap();
        assert!(store.list("footprint/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(matches!(
            store.put("../outside", String::new()).await,
            Err(Error::Storage(_))
        ));
        assert!(store.get("/etc/passwd").await.is_err());
    }
}
