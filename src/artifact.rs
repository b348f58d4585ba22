//! Artifact storage abstraction
//!
//! Pipelines never touch storage paths directly; they talk to an
//! [`ArtifactStore`] in terms of named collections. [`LocalArtifactStore`]
//! implements the trait over a root directory, which is enough for
//! single-host deployments and tests; remote backends implement the same
//! trait.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Collection names used by the pipelines
pub mod collections {
    /// Uploaded import sources and final export artifacts
    pub const FILES: &str = "file";
    /// Export partials awaiting collation
    pub const EXPORT_PARTS: &str = "temp";
    /// Per-chunk import failure reports
    pub const FAILED_CHUNKS: &str = "failed-chunks";
    /// Combined import failure reports
    pub const FAILED: &str = "failed";
}

/// Storage backend for pipeline artifacts
///
/// Artifacts live in flat named collections. Names may contain `/` to place
/// an artifact under a sub-directory of its collection.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store an artifact, replacing any previous content under the same name
    async fn put(&self, collection: &str, name: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch an artifact's content
    async fn get(&self, collection: &str, name: &str) -> Result<Vec<u8>>;

    /// Delete an artifact; deleting a missing artifact is not an error
    async fn delete(&self, collection: &str, name: &str) -> Result<()>;

    /// List artifact names in a collection starting with `prefix`, sorted
    async fn list(&self, collection: &str, prefix: &str) -> Result<Vec<String>>;

    /// Whether an artifact exists
    async fn exists(&self, collection: &str, name: &str) -> Result<bool>;
}

/// Filesystem-backed artifact store
///
/// Each collection is a directory under the root; artifact names map to file
/// names within it.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, collection: &str, name: &str) -> PathBuf {
        self.root.join(collection).join(name)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, collection: &str, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(collection, name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, collection: &str, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(collection, name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::Artifact(format!(
                "no such artifact {name:?} in collection {collection:?}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, collection: &str, name: &str) -> Result<()> {
        let path = self.path_for(collection, name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, collection: &str, prefix: &str) -> Result<Vec<String>> {
        let dir = self.root.join(collection);
        // Names with a '/' live one level down; walk from there instead
        let (dir, prefix) = match prefix.rsplit_once('/') {
            Some((sub, rest)) => (dir.join(sub), rest.to_string()),
            None => (dir, prefix.to_string()),
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, collection: &str, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(collection, name)).await?)
    }
}

/// Materialize an artifact into a local file, creating parent directories
pub async fn materialize(
    store: &dyn ArtifactStore,
    collection: &str,
    name: &str,
    target: &Path,
) -> Result<()> {
    let bytes = store.get(collection, name).await?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, bytes).await?;
    Ok(())
}
