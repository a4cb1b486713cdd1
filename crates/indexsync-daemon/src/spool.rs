//! Repository served from a JSON export on disk.
//!
//! The export is re-read whenever its modification time changes, so a
//! separate process can publish new transactions by rewriting the file.

use async_trait::async_trait;
use indexsync_core::{AclChangeSet, AclReaders, ChangeRecord, NodeMetadata, TextContent, Transaction};
use indexsync_indexer::{
    IndexerError, InMemoryRepository, LogWindow, NodeSelector, RepositoryClient, RepositoryData,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, info};

pub struct SpoolRepository {
    path: PathBuf,
    inner: InMemoryRepository,
    loaded: Mutex<Option<SystemTime>>,
}

impl SpoolRepository {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            inner: InMemoryRepository::default(),
            loaded: Mutex::new(None),
        }
    }

    /// Reload the export if it changed since the last read.
    fn refresh(&self) -> Result<(), IndexerError> {
        let modified = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No repository export yet");
                return Ok(());
            }
            Err(e) => return Err(IndexerError::Repository(e.to_string())),
        };

        let mut loaded = self.loaded.lock();
        if *loaded == Some(modified) {
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let data: RepositoryData = serde_json::from_str(&content)?;
        info!(
            path = ?self.path,
            transactions = data.transactions.len(),
            nodes = data.nodes.len(),
            change_sets = data.acl_change_sets.len(),
            "Loaded repository export"
        );
        self.inner.replace(data);
        *loaded = Some(modified);
        Ok(())
    }
}

#[async_trait]
impl RepositoryClient for SpoolRepository {
    async fn list_transactions_since(
        &self,
        window: LogWindow,
    ) -> Result<Vec<Transaction>, IndexerError> {
        self.refresh()?;
        self.inner.list_transactions_since(window).await
    }

    async fn list_acl_change_sets_since(
        &self,
        window: LogWindow,
    ) -> Result<Vec<AclChangeSet>, IndexerError> {
        self.refresh()?;
        self.inner.list_acl_change_sets_since(window).await
    }

    async fn get_node_changes(&self, txn_id: i64) -> Result<Vec<ChangeRecord>, IndexerError> {
        self.inner.get_node_changes(txn_id).await
    }

    async fn get_nodes_metadata(
        &self,
        selector: &NodeSelector,
    ) -> Result<Vec<NodeMetadata>, IndexerError> {
        self.inner.get_nodes_metadata(selector).await
    }

    async fn get_acls_for_change_set(&self, change_set_id: i64) -> Result<Vec<i64>, IndexerError> {
        self.inner.get_acls_for_change_set(change_set_id).await
    }

    async fn get_acl_readers(&self, acl_ids: &[i64]) -> Result<Vec<AclReaders>, IndexerError> {
        self.inner.get_acl_readers(acl_ids).await
    }

    async fn get_text_content(
        &self,
        node_id: i64,
        property: &str,
    ) -> Result<TextContent, IndexerError> {
        self.refresh()?;
        self.inner.get_text_content(node_id, property).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn window() -> LogWindow {
        LogWindow {
            after_commit_time: 0,
            after_id: 0,
            until_commit_time: i64::MAX,
            max_results: 100,
        }
    }

    fn export(transactions: &[(i64, i64)]) -> String {
        let data = RepositoryData {
            transactions: transactions
                .iter()
                .map(|(id, time)| Transaction::new(*id, *time))
                .collect(),
            ..Default::default()
        };
        serde_json::to_string(&data).unwrap()
    }

    #[tokio::test]
    async fn test_missing_export_is_empty() {
        let dir = tempdir().unwrap();
        let repo = SpoolRepository::new(dir.path().join("repository.json"));
        assert!(repo.list_transactions_since(window()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reloads_rewritten_export() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repository.json");
        std::fs::write(&path, export(&[(1, 100)])).unwrap();

        let repo = SpoolRepository::new(path.clone());
        assert_eq!(repo.list_transactions_since(window()).await.unwrap().len(), 1);

        std::fs::write(&path, export(&[(1, 100), (2, 200)])).unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();

        assert_eq!(repo.list_transactions_since(window()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_export_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repository.json");
        std::fs::write(&path, "{ not json").unwrap();

        let repo = SpoolRepository::new(path);
        let err = repo.list_transactions_since(window()).await.unwrap_err();
        assert!(matches!(err, IndexerError::Serialization(_)));
    }
}
