//! Persistence: the content cache and the index snapshot file.
//!
//! The content cache holds one fully assembled document per
//! (tenant, node id) so content extraction is not repeated when only
//! metadata changes. Blobs are replaced atomically; readers never see a
//! partial write.

mod snapshot;

pub use snapshot::IndexSnapshot;

use crate::IndexerError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Durable blob store keyed by (tenant, node id).
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn exists(&self, tenant: &str, node_id: i64) -> Result<bool, IndexerError>;

    async fn read(&self, tenant: &str, node_id: i64) -> Result<Option<Vec<u8>>, IndexerError>;

    /// Store a blob, replacing any previous one.
    async fn write(&self, tenant: &str, node_id: i64, bytes: &[u8]) -> Result<(), IndexerError>;

    /// Remove a blob. Returns whether one existed.
    async fn delete(&self, tenant: &str, node_id: i64) -> Result<bool, IndexerError>;
}

/// Content cache on the local filesystem.
///
/// Layout: `<base>/<tenant hash>/<node id>.msgpack`.
pub struct FileContentStore {
    base_dir: PathBuf,
    write_seq: AtomicU64,
}

impl FileContentStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            write_seq: AtomicU64::new(0),
        }
    }

    /// Directory name for a tenant; tenants are arbitrary strings.
    pub fn tenant_hash(tenant: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tenant.as_bytes());
        let result = hasher.finalize();
        format!("{:x}", result)[..16].to_string()
    }

    fn tenant_dir(&self, tenant: &str) -> PathBuf {
        self.base_dir.join(Self::tenant_hash(tenant))
    }

    fn blob_path(&self, tenant: &str, node_id: i64) -> PathBuf {
        self.tenant_dir(tenant).join(format!("{}.msgpack", node_id))
    }
}

#[async_trait]
impl ContentStore for FileContentStore {
    async fn exists(&self, tenant: &str, node_id: i64) -> Result<bool, IndexerError> {
        Ok(tokio::fs::try_exists(self.blob_path(tenant, node_id)).await?)
    }

    async fn read(&self, tenant: &str, node_id: i64) -> Result<Option<Vec<u8>>, IndexerError> {
        match tokio::fs::read(self.blob_path(tenant, node_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IndexerError::ContentStore(format!(
                "read {}/{}: {}",
                tenant, node_id, e
            ))),
        }
    }

    async fn write(&self, tenant: &str, node_id: i64, bytes: &[u8]) -> Result<(), IndexerError> {
        let dir = self.tenant_dir(tenant);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.blob_path(tenant, node_id);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);

        // Atomic write: write to temp file, then rename
        let temp_path = dir.join(format!(".{}.{}.tmp", node_id, seq));
        tokio::fs::write(&temp_path, bytes).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        debug!(tenant = %tenant, node_id = node_id, size = bytes.len(), "Cached document");
        Ok(())
    }

    async fn delete(&self, tenant: &str, node_id: i64) -> Result<bool, IndexerError> {
        match tokio::fs::remove_file(self.blob_path(tenant, node_id)).await {
            Ok(()) => {
                debug!(tenant = %tenant, node_id = node_id, "Removed cached document");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
