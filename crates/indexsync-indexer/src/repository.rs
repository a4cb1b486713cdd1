//! Repository client contract.
//!
//! The repository owns transactions, node metadata and ACLs; the
//! synchronizer reads them through [`RepositoryClient`]. Transport and
//! authentication live behind implementations of the trait.
//! [`InMemoryRepository`] serves a repository export held in memory.

use crate::IndexerError;
use async_trait::async_trait;
use indexsync_core::{
    AclChangeSet, AclReaders, ChangeRecord, ContentStatus, NodeMetadata, TextContent, Transaction,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A slice of a repository log: entries strictly after the cursor
/// `(after_commit_time, after_id)` and committed no later than
/// `until_commit_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogWindow {
    pub after_commit_time: i64,
    pub after_id: i64,
    pub until_commit_time: i64,
    pub max_results: usize,
}

impl LogWindow {
    pub fn includes(&self, commit_time: i64, id: i64) -> bool {
        (commit_time, id) > (self.after_commit_time, self.after_id)
            && commit_time <= self.until_commit_time
    }
}

/// Which nodes to fetch metadata for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSelector {
    Ids(Vec<i64>),
    /// Inclusive id range
    Range { from_id: i64, to_id: i64 },
}

impl NodeSelector {
    pub fn single(id: i64) -> Self {
        NodeSelector::Range {
            from_id: id,
            to_id: id,
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        match self {
            NodeSelector::Ids(ids) => ids.contains(&id),
            NodeSelector::Range { from_id, to_id } => (*from_id..=*to_id).contains(&id),
        }
    }
}

#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Transactions inside the window, ordered by commit time then id.
    async fn list_transactions_since(
        &self,
        window: LogWindow,
    ) -> Result<Vec<Transaction>, IndexerError>;

    /// ACL change sets inside the window, ordered by commit time then id.
    async fn list_acl_change_sets_since(
        &self,
        window: LogWindow,
    ) -> Result<Vec<AclChangeSet>, IndexerError>;

    async fn get_node_changes(&self, txn_id: i64) -> Result<Vec<ChangeRecord>, IndexerError>;

    /// Current metadata; nodes that no longer exist are simply absent.
    async fn get_nodes_metadata(
        &self,
        selector: &NodeSelector,
    ) -> Result<Vec<NodeMetadata>, IndexerError>;

    async fn get_acls_for_change_set(&self, change_set_id: i64) -> Result<Vec<i64>, IndexerError>;

    async fn get_acl_readers(&self, acl_ids: &[i64]) -> Result<Vec<AclReaders>, IndexerError>;

    /// Extract the text of one content property.
    async fn get_text_content(
        &self,
        node_id: i64,
        property: &str,
    ) -> Result<TextContent, IndexerError>;
}

/// Extracted text for one (node, content property).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredText {
    pub node_id: i64,
    pub property: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default = "default_text_status")]
    pub status: ContentStatus,
    #[serde(default)]
    pub exception_text: Option<String>,
}

fn default_text_status() -> ContentStatus {
    ContentStatus::Ok
}

/// A full repository export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryData {
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub node_changes: Vec<ChangeRecord>,
    #[serde(default)]
    pub nodes: Vec<NodeMetadata>,
    #[serde(default)]
    pub acl_change_sets: Vec<AclChangeSet>,
    #[serde(default)]
    pub acls: Vec<AclReaders>,
    #[serde(default)]
    pub texts: Vec<StoredText>,
}

/// Repository served from memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    data: RwLock<RepositoryData>,
}

impl InMemoryRepository {
    pub fn new(data: RepositoryData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Swap in a newer export.
    pub fn replace(&self, data: RepositoryData) {
        *self.data.write() = data;
    }

    /// Record a committed transaction and its node changes.
    pub fn commit_transaction(&self, txn: Transaction, changes: Vec<ChangeRecord>) {
        let mut data = self.data.write();
        data.node_changes.extend(changes);
        data.transactions.push(txn);
    }

    /// Insert or replace a node's current metadata.
    pub fn put_node(&self, metadata: NodeMetadata) {
        let mut data = self.data.write();
        data.nodes.retain(|n| n.id != metadata.id);
        data.nodes.push(metadata);
    }

    pub fn remove_node(&self, node_id: i64) {
        self.data.write().nodes.retain(|n| n.id != node_id);
    }

    /// Record a committed ACL change set with the ACLs it touched.
    pub fn commit_acl_change_set(&self, change_set: AclChangeSet, acls: Vec<AclReaders>) {
        let mut data = self.data.write();
        for acl in acls {
            data.acls.retain(|a| a.acl_id != acl.acl_id);
            data.acls.push(acl);
        }
        data.acl_change_sets.push(change_set);
    }

    pub fn put_text(&self, node_id: i64, property: &str, text: &str) {
        let mut data = self.data.write();
        data.texts
            .retain(|t| !(t.node_id == node_id && t.property == property));
        data.texts.push(StoredText {
            node_id,
            property: property.to_string(),
            text: Some(text.to_string()),
            status: ContentStatus::Ok,
            exception_text: None,
        });
    }
}

#[async_trait]
impl RepositoryClient for InMemoryRepository {
    async fn list_transactions_since(
        &self,
        window: LogWindow,
    ) -> Result<Vec<Transaction>, IndexerError> {
        let data = self.data.read();
        let mut txns: Vec<Transaction> = data
            .transactions
            .iter()
            .filter(|t| window.includes(t.commit_time_ms, t.id))
            .cloned()
            .collect();
        txns.sort_by_key(|t| (t.commit_time_ms, t.id));
        txns.truncate(window.max_results);
        Ok(txns)
    }

    async fn list_acl_change_sets_since(
        &self,
        window: LogWindow,
    ) -> Result<Vec<AclChangeSet>, IndexerError> {
        let data = self.data.read();
        let mut change_sets: Vec<AclChangeSet> = data
            .acl_change_sets
            .iter()
            .filter(|c| window.includes(c.commit_time_ms, c.id))
            .cloned()
            .collect();
        change_sets.sort_by_key(|c| (c.commit_time_ms, c.id));
        change_sets.truncate(window.max_results);
        Ok(change_sets)
    }

    async fn get_node_changes(&self, txn_id: i64) -> Result<Vec<ChangeRecord>, IndexerError> {
        Ok(self
            .data
            .read()
            .node_changes
            .iter()
            .filter(|c| c.txn_id == txn_id)
            .cloned()
            .collect())
    }

    async fn get_nodes_metadata(
        &self,
        selector: &NodeSelector,
    ) -> Result<Vec<NodeMetadata>, IndexerError> {
        Ok(self
            .data
            .read()
            .nodes
            .iter()
            .filter(|n| selector.contains(n.id))
            .cloned()
            .collect())
    }

    async fn get_acls_for_change_set(&self, change_set_id: i64) -> Result<Vec<i64>, IndexerError> {
        Ok(self
            .data
            .read()
            .acls
            .iter()
            .filter(|a| a.change_set_id == change_set_id)
            .map(|a| a.acl_id)
            .collect())
    }

    async fn get_acl_readers(&self, acl_ids: &[i64]) -> Result<Vec<AclReaders>, IndexerError> {
        Ok(self
            .data
            .read()
            .acls
            .iter()
            .filter(|a| acl_ids.contains(&a.acl_id))
            .cloned()
            .collect())
    }

    async fn get_text_content(
        &self,
        node_id: i64,
        property: &str,
    ) -> Result<TextContent, IndexerError> {
        let data = self.data.read();
        let stored = data
            .texts
            .iter()
            .find(|t| t.node_id == node_id && t.property == property);

        Ok(match stored {
            Some(stored) => TextContent {
                status: stored.status,
                exception_text: stored.exception_text.clone(),
                duration_ms: 0,
                content: stored.text.as_ref().map(|t| t.as_bytes().to_vec()),
            },
            None => TextContent {
                status: ContentStatus::NoContent,
                exception_text: None,
                duration_ms: 0,
                content: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexsync_core::NodeStatus;

    fn window(after: (i64, i64), until: i64, max: usize) -> LogWindow {
        LogWindow {
            after_commit_time: after.0,
            after_id: after.1,
            until_commit_time: until,
            max_results: max,
        }
    }

    #[test]
    fn test_window_bounds() {
        let w = window((100, 5), 200, 10);
        assert!(!w.includes(100, 5));
        assert!(w.includes(100, 6));
        assert!(w.includes(200, 1));
        assert!(!w.includes(201, 9));
        assert!(!w.includes(99, 50));
    }

    #[tokio::test]
    async fn test_transactions_ordered_and_limited() {
        let repo = InMemoryRepository::default();
        repo.commit_transaction(Transaction::new(3, 300), vec![]);
        repo.commit_transaction(Transaction::new(1, 100), vec![]);
        repo.commit_transaction(Transaction::new(2, 200), vec![]);

        let txns = repo
            .list_transactions_since(window((0, 0), 1_000, 2))
            .await
            .unwrap();
        let ids: Vec<_> = txns.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_changes_by_transaction() {
        let repo = InMemoryRepository::default();
        repo.commit_transaction(
            Transaction::new(7, 700),
            vec![
                ChangeRecord::new(1, NodeStatus::Updated, 7),
                ChangeRecord::new(2, NodeStatus::Deleted, 7),
            ],
        );
        assert_eq!(repo.get_node_changes(7).await.unwrap().len(), 2);
        assert!(repo.get_node_changes(8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_text_is_no_content() {
        let repo = InMemoryRepository::default();
        let text = repo.get_text_content(1, "cm:content").await.unwrap();
        assert_eq!(text.status, ContentStatus::NoContent);
        assert!(text.content.is_none());
    }

    #[test]
    fn test_selector() {
        assert!(NodeSelector::single(4).contains(4));
        assert!(!NodeSelector::single(4).contains(5));
        assert!(NodeSelector::Ids(vec![1, 9]).contains(9));
    }
}
