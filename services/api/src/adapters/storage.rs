//! services/api/src/adapters/storage.rs
//!
//! Filesystem-backed implementation of the `ArtifactStore` port. Uploaded
//! tracks and generated outputs live under a single root directory; storage
//! locations are slash-separated relative paths like
//! `jobs/<job_id>/<language>/dubbed.mp3`.

use async_trait::async_trait;
use dubber_core::ports::{ArtifactStore, PortError, PortResult};
use std::path::{Component, Path, PathBuf};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An artifact store that reads and writes blobs under a local root directory.
#[derive(Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates a new `FsArtifactStore`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolves a storage location to an absolute path, rejecting anything
    /// that would escape the root directory.
    fn resolve(&self, location: &str) -> PortResult<PathBuf> {
        let relative = Path::new(location);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if location.is_empty() || escapes {
            return Err(PortError::Validation(format!(
                "Invalid storage location '{}'",
                location
            )));
        }
        Ok(self.root.join(relative))
    }
}

//=========================================================================================
// `ArtifactStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn fetch(&self, location: &str) -> PortResult<Vec<u8>> {
        let path = self.resolve(location)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                PortError::NotFound(format!("No stored track at '{}'", location))
            }
            _ => PortError::Unexpected(format!("Failed to read '{}': {}", location, e)),
        })
    }

    async fn store(&self, location: &str, data: &[u8]) -> PortResult<u64> {
        let path = self.resolve(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PortError::Unexpected(format!("Failed to create '{}': {}", parent.display(), e))
            })?;
        }
        // Overwrites any previous blob at this location, which keeps stage
        // re-runs idempotent.
        tokio::fs::write(&path, data).await.map_err(|e| {
            PortError::Unexpected(format!("Failed to write '{}': {}", location, e))
        })?;
        Ok(data.len() as u64)
    }
}
