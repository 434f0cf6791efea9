//! Storage behind the file hooks.
//!
//! Paths are virtual and `/`-separated, as the file front end sees them.
//! A missing object is reported as `Error::Io` with kind `NotFound`.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;

#[async_trait]
pub trait StorageDriver: Send + Sync {
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    async fn put(&self, path: &str, content: &[u8]) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Swaps the stored content of `path`.
    ///
    /// The default deletes then writes: a crash in between loses the file.
    /// Drivers that can do better should override it.
    async fn replace(&self, path: &str, content: &[u8]) -> Result<()> {
        self.delete(path).await?;
        self.put(path, content).await
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{path}: no such file"))
}

/// Files under a local directory.
pub struct LocalFsDriver {
    root: PathBuf,
}

impl LocalFsDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a virtual path under the root. `..` and drive prefixes are
    /// rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("{path}: path escapes the storage root"),
                    )
                    .into());
                }
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl StorageDriver for LocalFsDriver {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.resolve(path)?).await?)
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        tokio::fs::remove_file(self.resolve(path)?).await?;
        Ok(())
    }

    /// Writes a sibling temporary file and renames it over the target, so
    /// readers see either the old or the new content.
    async fn replace(&self, path: &str, content: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| not_found(path))?;
        let temp = target.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));

        tokio::fs::write(&temp, content).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        debug!("Replaced {} ({} bytes)", target.display(), content.len());
        Ok(())
    }
}

/// In-process storage.
#[derive(Default)]
pub struct MemoryDriver {
    files: DashMap<String, Vec<u8>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .map(|v| v.value().clone())
            .ok_or_else(|| not_found(path).into())
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        self.files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path).into())
    }
}
