//! # Directory Object Store
//!
//! Filesystem-backed [`ObjectStore`]: each key becomes a file under a root
//! directory. Lets the bridge run against a local or mounted directory
//! (e.g. a synced folder) without a cloud SDK.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::{ObjectStore, StoreError};

/// Stores objects as files under `root`
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path, rejecting keys that escape the root
    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !is_plain {
            return Err(StoreError::Permanent(format!("invalid object key: {:?}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for DirectoryStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StoreError> {
        let path = self.object_path(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(classify)?;
        }
        tokio::fs::write(&path, &body).await.map_err(classify)?;

        debug!("Wrote {} ({} bytes, {})", path.display(), body.len(), content_type);
        Ok(())
    }
}

fn classify(e: io::Error) -> StoreError {
    match e.kind() {
        ErrorKind::PermissionDenied | ErrorKind::InvalidInput => StoreError::Permanent(e.to_string()),
        _ => StoreError::Transient(e.to_string()),
    }
}
