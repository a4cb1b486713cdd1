//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use indexsync_core::{
    now_ms, AclChangeSet, AclReaders, ChangeRecord, ContentRef, ModelHandle, NodeMetadata,
    NodeStatus, ParentAssoc, PropertyValue, SyncConfig, TextContent, Transaction,
};
use indexsync_indexer::{
    FileContentStore, IndexerError, InMemoryRepository, InformationServer, LogWindow, MemoryIndex,
    NodeOutcome, NodeSelector, RepositoryClient,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Pauses metadata requests for one node until released.
#[derive(Default)]
pub struct Gate {
    pub reached: Notify,
    pub release: Notify,
}

/// In-memory repository that can be told to fail.
#[derive(Default)]
pub struct FakeRepository {
    pub inner: InMemoryRepository,
    poisoned: Mutex<HashSet<i64>>,
    broken_text: Mutex<HashSet<i64>>,
    listing_down: AtomicBool,
    gate: Mutex<Option<(i64, Arc<Gate>)>>,
}

impl FakeRepository {
    /// Metadata requests that include `node_id` fail.
    pub fn poison(&self, node_id: i64) {
        self.poisoned.lock().insert(node_id);
    }

    pub fn heal(&self, node_id: i64) {
        self.poisoned.lock().remove(&node_id);
        self.broken_text.lock().remove(&node_id);
    }

    /// Text extraction for `node_id` fails.
    pub fn break_text(&self, node_id: i64) {
        self.broken_text.lock().insert(node_id);
    }

    /// Metadata requests that include `node_id` wait on the returned gate.
    pub fn gate(&self, node_id: i64) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock() = Some((node_id, gate.clone()));
        gate
    }

    pub fn set_listing_down(&self, down: bool) {
        self.listing_down.store(down, Ordering::SeqCst);
    }

    fn check_listing(&self) -> Result<(), IndexerError> {
        if self.listing_down.load(Ordering::SeqCst) {
            return Err(IndexerError::Repository("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryClient for FakeRepository {
    async fn list_transactions_since(
        &self,
        window: LogWindow,
    ) -> Result<Vec<Transaction>, IndexerError> {
        self.check_listing()?;
        self.inner.list_transactions_since(window).await
    }

    async fn list_acl_change_sets_since(
        &self,
        window: LogWindow,
    ) -> Result<Vec<AclChangeSet>, IndexerError> {
        self.check_listing()?;
        self.inner.list_acl_change_sets_since(window).await
    }

    async fn get_node_changes(&self, txn_id: i64) -> Result<Vec<ChangeRecord>, IndexerError> {
        self.inner.get_node_changes(txn_id).await
    }

    async fn get_nodes_metadata(
        &self,
        selector: &NodeSelector,
    ) -> Result<Vec<NodeMetadata>, IndexerError> {
        let gate = self
            .gate
            .lock()
            .as_ref()
            .filter(|(id, _)| selector.contains(*id))
            .map(|(_, gate)| gate.clone());
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }

        let poisoned = self
            .poisoned
            .lock()
            .iter()
            .copied()
            .find(|id| selector.contains(*id));
        if let Some(id) = poisoned {
            return Err(IndexerError::Repository(format!(
                "metadata for node {} is corrupt",
                id
            )));
        }
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
        if self.broken_text.lock().contains(&node_id) {
            return Err(IndexerError::Repository(format!(
                "transformer crashed on node {}",
                node_id
            )));
        }
        self.inner.get_text_content(node_id, property).await
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub config: SyncConfig,
    pub index: Arc<MemoryIndex>,
    pub store: Arc<FileContentStore>,
    pub repository: Arc<FakeRepository>,
    pub server: Arc<InformationServer>,
}

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let index = Arc::new(MemoryIndex::new());
    let store = Arc::new(FileContentStore::new(config.content_store_dir()));
    let repository = Arc::new(FakeRepository::default());
    let server = Arc::new(InformationServer::new(
        &config,
        index.clone(),
        store.clone(),
        repository.clone(),
        ModelHandle::default(),
    ));

    Harness {
        dir,
        config,
        index,
        store,
        repository,
        server,
    }
}

/// Commit time a minute ago, safely inside the indexing window.
pub fn recent(offset_ms: i64) -> i64 {
    now_ms() - 60_000 + offset_ms
}

pub fn document(id: i64, txn_id: i64) -> NodeMetadata {
    let mut md = NodeMetadata::deleted(&ChangeRecord::new(id, NodeStatus::Updated, txn_id));
    md.node_type = "cm:content".to_string();
    md.acl_id = 1;
    md.properties.insert(
        "cm:name".to_string(),
        PropertyValue::Text(format!("doc-{}.txt", id)),
    );
    md
}

pub fn with_content(mut md: NodeMetadata, content_id: i64) -> NodeMetadata {
    md.properties.insert(
        "cm:content".to_string(),
        PropertyValue::Content(ContentRef {
            content_id,
            mimetype: "text/plain".to_string(),
            encoding: "UTF-8".to_string(),
            locale: "en".to_string(),
            length: 64,
        }),
    );
    md
}

pub fn folder(id: i64, txn_id: i64) -> NodeMetadata {
    let mut md = document(id, txn_id);
    md.node_type = "cm:folder".to_string();
    md
}

/// Place `md` under `parent` at `path`, with `ancestors` nearest first.
pub fn placed(mut md: NodeMetadata, parent: i64, ancestors: &[i64], path: &str, crc: i64) -> NodeMetadata {
    md.parent_assocs = vec![ParentAssoc {
        parent_id: parent,
        assoc_type: "cm:contains".to_string(),
        assoc_name: format!("cm:{}", md.id),
        is_primary: true,
    }];
    md.ancestors = ancestors.to_vec();
    md.paths = vec![path.to_string()];
    md.parent_assoc_crc = crc;
    md
}

pub fn updated(id: i64, txn_id: i64) -> ChangeRecord {
    ChangeRecord::new(id, NodeStatus::Updated, txn_id)
}

pub fn deleted(id: i64, txn_id: i64) -> ChangeRecord {
    ChangeRecord::new(id, NodeStatus::Deleted, txn_id)
}

/// Index one change in its own session and commit it.
pub async fn index_committed(h: &Harness, change: &ChangeRecord) -> NodeOutcome {
    let session = h.server.session();
    let outcome = h.server.index_node(&session, change, true).await.unwrap();
    h.server.commit(session).unwrap();
    outcome
}

/// Index a batch in its own session and commit it.
pub async fn index_all_committed(h: &Harness, changes: &[ChangeRecord]) -> Vec<NodeOutcome> {
    let session = h.server.session();
    let outcomes = h.server.index_nodes(&session, changes, true).await.unwrap();
    h.server.commit(session).unwrap();
    outcomes
}
