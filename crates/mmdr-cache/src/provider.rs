//! Durable storage trait and implementations.

use crate::keys::sanitize_name;
use async_trait::async_trait;
use mmdr_core::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Byte-oriented storage keyed by entry name.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Read an entry. `Ok(None)` when it does not exist.
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Write an entry, replacing any previous content.
    async fn write(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Delete an entry. Returns whether something was removed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// List all entry names.
    async fn list(&self) -> Result<Vec<String>>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;

    /// Where entries live, for diagnostics.
    fn location(&self) -> String;
}

/// Filesystem-backed store: one file per entry under a root directory.
pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    /// Create the root directory if it is missing.
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir)
            .await
            .map_err(|e| Error::Cache(format!("Failed to create cache dir: {}", e)))
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.root_dir.join(sanitize_name(name))
    }

    fn is_temp(name: &str) -> bool {
        name.contains(".tmp-")
    }
}

#[async_trait]
impl ArtifactStore for FilesystemStore {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.entry_path(name)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Cache(format!("Failed to read {}: {}", name, e))),
        }
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        self.ensure_dir().await?;

        // Write-then-rename so readers never observe a partial file.
        let target = self.entry_path(name);
        let tmp = self
            .root_dir
            .join(format!("{}.tmp-{}", sanitize_name(name), uuid::Uuid::new_v4().simple()));

        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Error::Cache(format!("Failed to write {}: {}", name, e)))?;

        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Cache(format!("Failed to commit {}: {}", name, e)));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.entry_path(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Cache(format!("Failed to delete {}: {}", name, e))),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(Error::Cache(format!("Failed to read cache dir: {}", e))),
        };

        let mut names = vec![];
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| Error::Cache(format!("Failed to read entry: {}", e)))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !Self::is_temp(&name) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    async fn clear(&self) -> Result<()> {
        let mut read_dir = match tokio::fs::read_dir(&self.root_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return self.ensure_dir().await,
            Err(e) => return Err(Error::Cache(format!("Failed to read cache dir: {}", e))),
        };

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| Error::Cache(format!("Failed to read entry: {}", e)))?
        {
            let path = entry.path();
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Err(e) if e.kind() != ErrorKind::NotFound => {
                    return Err(Error::Cache(format!(
                        "Failed to remove {}: {}",
                        path.display(),
                        e
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.root_dir.display().to_string()
    }
}

/// In-memory store, for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(name).cloned())
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        self.entries.write().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.entries.write().remove(name).is_some())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

impl Default for FilesystemStore {
    fn default() -> Self {
        Self::new(PathBuf::from("./cache"))
    }
}
