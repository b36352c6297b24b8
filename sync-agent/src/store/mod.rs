//! Remote object store backends.
//!
//! The engine only ever talks to the remote side through [`ObjectStore`]:
//! plain put/get/delete/stat on string keys. There is no compare-and-swap and
//! no server-side locking, which is why the lease protocol in
//! [`crate::lock`] exists.

pub mod directory;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use directory::DirectoryStore;
pub use http::HttpStore;
pub use memory::MemoryStore;

use crate::config::{BackendKind, RemoteConfig};

/// Namespace reserved for engine bookkeeping objects.
pub const RESERVED_PREFIX: &str = "__sync/";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} for key {key}")]
    Status { status: u16, key: String },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// An object read back from the store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    /// Opaque freshness marker (ETag or equivalent), if the backend has one
    pub freshness: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError>;

    /// Read `key`; `Ok(None)` when the object does not exist.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Remove `key`. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Whether `key` currently exists.
    async fn stat(&self, key: &str) -> Result<bool, StoreError>;

    /// Upload a local file under `key`.
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        let body = tokio::fs::read(path).await?;
        self.put(key, Bytes::from(body)).await
    }
}

/// Build the configured backend.
pub fn from_config(remote: &RemoteConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    match remote.backend {
        BackendKind::Http => Ok(Arc::new(HttpStore::new(
            &remote.endpoint,
            &remote.bucket,
            remote.token.clone(),
        )?)),
        BackendKind::Directory => {
            let root = remote.root.as_ref().ok_or_else(|| {
                StoreError::Unavailable("directory backend has no root".to_string())
            })?;
            Ok(Arc::new(DirectoryStore::new(root)))
        }
    }
}

/// Reject keys that could escape a backend's namespace.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
