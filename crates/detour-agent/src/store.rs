//! Storage backends for versioned cache namespaces.

use async_trait::async_trait;
use detour_common::protocol::error::{DetourError, Result};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Named storage areas holding cached artifacts.
///
/// Deleting a namespace that does not exist succeeds and returns `false`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Opens `name`, creating it if needed.
    async fn open(&self, name: &str) -> Result<()>;
    /// Lists every existing namespace.
    async fn keys(&self) -> Result<Vec<String>>;
    /// Deletes `name`; returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    namespaces: RwLock<BTreeSet<String>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `names`.
    pub fn with_namespaces<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: RwLock::new(names.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, name: &str) -> Result<()> {
        self.namespaces.write().await.insert(name.to_string());
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.namespaces.read().await.iter().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.namespaces.write().await.remove(name))
    }
}

/// One directory per namespace under `root`.
#[derive(Debug, Clone)]
pub struct DiskCacheStore {
    root: PathBuf,
}

impl DiskCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn namespace_dir(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.contains('\0');
        if !valid {
            return Err(DetourError::Storage(format!(
                "invalid namespace name '{}'",
                name
            )));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    async fn open(&self, name: &str) -> Result<()> {
        let dir = self.namespace_dir(name)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let dir = self.namespace_dir(name)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_open_is_idempotent() {
        let store = MemoryCacheStore::new();
        store.open("detour-v1").await.unwrap();
        store.open("detour-v1").await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["detour-v1"]);
    }

    #[tokio::test]
    async fn test_memory_store_delete_missing() {
        let store = MemoryCacheStore::with_namespaces(["a"]);
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disk_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskCacheStore::new(dir.path().join("cache"));

        assert!(store.keys().await.unwrap().is_empty());

        store.open("detour-v2").await.unwrap();
        store.open("detour-v1").await.unwrap();
        std::fs::write(dir.path().join("cache/detour-v1/app.js"), b"console.log(1)").unwrap();
        std::fs::write(dir.path().join("cache/stray-file"), b"x").unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["detour-v1", "detour-v2"]);

        assert!(store.delete("detour-v1").await.unwrap());
        assert!(!store.delete("detour-v1").await.unwrap());
        assert_eq!(store.keys().await.unwrap(), vec!["detour-v2"]);
    }

    #[tokio::test]
    async fn test_disk_store_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskCacheStore::new(dir.path());

        for name in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(store.open(name).await, Err(DetourError::Storage(_))));
            assert!(matches!(store.delete(name).await, Err(DetourError::Storage(_))));
        }
    }
}
