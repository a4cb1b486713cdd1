//! Node indexing.
//!
//! Decides the index mutation for each changed node, builds the document
//! and stages it. Every node is written as delete-by-`DBID` followed by
//! an add, so replaying a change leaves exactly one document behind.

use crate::builder::{error_document, DocumentBuilder};
use crate::content::ContentResolver;
use crate::document::*;
use crate::engine::{IndexEngine, WriteOp, WriteSession};
use crate::query::Query;
use crate::repository::{NodeSelector, RepositoryClient};
use crate::IndexerError;
use indexsync_core::{
    tenant_id, ChangeRecord, ModelHandle, NodeMetadata, NodeStatus, TrackerStats, DEFAULT_TENANT,
};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What happened to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOutcome {
    Indexed,
    /// Excluded from the index; only a placeholder remains
    Unindexed,
    Deleted,
    /// A later transaction already owns the node
    Superseded,
    /// The repository no longer knows the node
    Missing,
    /// Recorded as an error marker
    Failed,
}

pub struct NodeIndexer {
    engine: Arc<dyn IndexEngine>,
    repository: Arc<dyn RepositoryClient>,
    content: Arc<ContentResolver>,
    model: ModelHandle,
    default_locale: String,
    /// (node id, txn id, parent assoc crc) already cascaded
    cascaded: Mutex<LruCache<(i64, i64, i64), ()>>,
    stats: Arc<TrackerStats>,
}

impl NodeIndexer {
    pub fn new(
        engine: Arc<dyn IndexEngine>,
        repository: Arc<dyn RepositoryClient>,
        content: Arc<ContentResolver>,
        model: ModelHandle,
        default_locale: String,
        cascade_cache_size: usize,
        stats: Arc<TrackerStats>,
    ) -> Self {
        let capacity = NonZeroUsize::new(cascade_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            engine,
            repository,
            content,
            model,
            default_locale,
            cascaded: Mutex::new(LruCache::new(capacity)),
            stats,
        }
    }

    /// Index one node. Processing failures become an error marker document.
    pub async fn index_node(
        &self,
        session: &WriteSession,
        change: &ChangeRecord,
        overwrite: bool,
    ) -> Result<NodeOutcome, IndexerError> {
        let start = Instant::now();
        let mut ops = Vec::new();

        let outcome = match self.process_node(session, change, overwrite, &mut ops).await {
            Ok(outcome) => {
                session.stage(ops);
                outcome
            }
            Err(e) => {
                self.record_failure(session, change, &e, overwrite);
                NodeOutcome::Failed
            }
        };

        self.stats.record_node(start.elapsed());
        debug!(node_id = change.id, txn_id = change.txn_id, outcome = ?outcome, "Indexed node");
        Ok(outcome)
    }

    /// Index a batch with one bulk metadata fetch. Any failure falls back
    /// to [`index_node`](Self::index_node) for every record.
    pub async fn index_nodes(
        &self,
        session: &WriteSession,
        changes: &[ChangeRecord],
        overwrite: bool,
    ) -> Result<Vec<NodeOutcome>, IndexerError> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let mut ops = Vec::new();

        match self.process_nodes(session, changes, overwrite, &mut ops).await {
            Ok(outcomes) => {
                session.stage(ops);
                let per_node = start.elapsed() / changes.len() as u32;
                for _ in changes {
                    self.stats.record_node(per_node);
                }
                Ok(outcomes)
            }
            Err(e) => {
                warn!(
                    nodes = changes.len(),
                    error = %e,
                    "Bulk indexing failed, indexing nodes one at a time"
                );
                let mut outcomes = Vec::with_capacity(changes.len());
                for change in changes {
                    outcomes.push(self.index_node(session, change, overwrite).await?);
                }
                Ok(outcomes)
            }
        }
    }

    /// Extract content for a node with a cached document and submit the
    /// refreshed document as an overwrite.
    pub async fn update_content_to_index_and_cache(
        &self,
        session: &WriteSession,
        node_id: i64,
        tenant: &str,
    ) -> Result<(), IndexerError> {
        let doc = self.content.refresh_cached_document(tenant, node_id).await?;
        session.stage(vec![
            WriteOp::DeleteByQuery(Query::term(FIELD_DBID, node_id)),
            WriteOp::Add {
                doc,
                overwrite: true,
            },
        ]);
        Ok(())
    }

    /// Forget completed cascades; their writes were rolled back.
    pub fn forget_cascades(&self) {
        self.cascaded.lock().clear();
    }

    async fn process_node(
        &self,
        session: &WriteSession,
        change: &ChangeRecord,
        overwrite: bool,
        ops: &mut Vec<WriteOp>,
    ) -> Result<NodeOutcome, IndexerError> {
        let fetched = if change.status.needs_update() {
            self.fetch_one(change.id).await?
        } else {
            None
        };

        if change.status.is_removal() {
            let metadata = match change.status {
                NodeStatus::Deleted => Some(NodeMetadata::deleted(change)),
                _ => fetched.clone(),
            };
            self.remove_node(session, change, metadata.as_ref(), overwrite, ops)
                .await?;
            if change.status == NodeStatus::Deleted {
                return Ok(NodeOutcome::Deleted);
            }
        }

        match fetched {
            None if change.status == NodeStatus::Unknown => Ok(NodeOutcome::Deleted),
            None => Ok(NodeOutcome::Missing),
            Some(metadata) if metadata.txn_id > change.txn_id => {
                debug!(
                    node_id = change.id,
                    txn_id = change.txn_id,
                    current_txn_id = metadata.txn_id,
                    "Node superseded by a later transaction"
                );
                Ok(NodeOutcome::Superseded)
            }
            Some(metadata) => self.index_metadata(session, &metadata, overwrite, ops).await,
        }
    }

    async fn process_nodes(
        &self,
        session: &WriteSession,
        changes: &[ChangeRecord],
        overwrite: bool,
        ops: &mut Vec<WriteOp>,
    ) -> Result<Vec<NodeOutcome>, IndexerError> {
        let update_ids: Vec<i64> = changes
            .iter()
            .filter(|c| c.status.needs_update())
            .map(|c| c.id)
            .collect();

        let mut fetched: HashMap<i64, NodeMetadata> = if update_ids.is_empty() {
            HashMap::new()
        } else {
            self.repository
                .get_nodes_metadata(&NodeSelector::Ids(update_ids))
                .await?
                .into_iter()
                .map(|m| (m.id, m))
                .collect()
        };

        let mut outcomes: HashMap<i64, NodeOutcome> = HashMap::new();

        for change in changes.iter().filter(|c| c.status.is_removal()) {
            let metadata = match change.status {
                NodeStatus::Deleted => Some(NodeMetadata::deleted(change)),
                _ => fetched.get(&change.id).cloned(),
            };
            self.remove_node(session, change, metadata.as_ref(), overwrite, ops)
                .await?;
            outcomes.insert(change.id, NodeOutcome::Deleted);
        }

        for change in changes.iter().filter(|c| c.status.needs_update()) {
            let outcome = match fetched.remove(&change.id) {
                None if change.status == NodeStatus::Unknown => NodeOutcome::Deleted,
                None => NodeOutcome::Missing,
                Some(metadata) if metadata.txn_id > change.txn_id => NodeOutcome::Superseded,
                Some(metadata) => self.index_metadata(session, &metadata, overwrite, ops).await?,
            };
            outcomes.insert(change.id, outcome);
        }

        Ok(changes
            .iter()
            .map(|c| outcomes.get(&c.id).copied().unwrap_or(NodeOutcome::Missing))
            .collect())
    }

    /// Cascade, drop the cached document and delete every document of the node.
    async fn remove_node(
        &self,
        session: &WriteSession,
        change: &ChangeRecord,
        metadata: Option<&NodeMetadata>,
        overwrite: bool,
        ops: &mut Vec<WriteOp>,
    ) -> Result<(), IndexerError> {
        if let Some(metadata) = metadata {
            if metadata.txn_id <= change.txn_id {
                let mut visited = HashSet::from([change.id]);
                let count = self.cascade(session, change.id, overwrite, &mut visited).await?;
                if count > 0 {
                    self.stats.record_cascade(count);
                    info!(node_id = change.id, descendants = count, "Re-indexed descendants of removed node");
                }
            }
        }

        let tenant = match metadata {
            Some(metadata) if !metadata.tenant.is_empty() => metadata.tenant.clone(),
            _ => self.indexed_tenant(change.id)?,
        };
        self.content
            .remove_document(tenant_id(&tenant), change.id)
            .await?;
        ops.push(WriteOp::DeleteByQuery(Query::term(FIELD_DBID, change.id)));
        Ok(())
    }

    /// Cascade if the node moved, then stage its document.
    async fn index_metadata(
        &self,
        session: &WriteSession,
        metadata: &NodeMetadata,
        overwrite: bool,
        ops: &mut Vec<WriteOp>,
    ) -> Result<NodeOutcome, IndexerError> {
        let may_have_children = self
            .model
            .snapshot()
            .may_have_children(&metadata.node_type, &metadata.aspects);
        if may_have_children {
            self.cascade_if_moved(session, metadata, overwrite).await?;
        }
        self.stage_document(metadata, overwrite, ops).await
    }

    /// Stage the document for current metadata.
    async fn stage_document(
        &self,
        metadata: &NodeMetadata,
        overwrite: bool,
        ops: &mut Vec<WriteOp>,
    ) -> Result<NodeOutcome, IndexerError> {
        let model = self.model.snapshot();
        let tenant = tenant_id(&metadata.tenant);
        let builder = DocumentBuilder::new(&model, &self.default_locale);

        // Also clears a previous placeholder or error marker
        ops.push(WriteOp::DeleteByQuery(Query::term(FIELD_DBID, metadata.id)));

        if !metadata.is_indexed() {
            debug!(node_id = metadata.id, "Node excluded from index");
            self.content.remove_document(tenant, metadata.id).await?;
            ops.push(WriteOp::Add {
                doc: builder.unindexed_document(metadata),
                overwrite,
            });
            return Ok(NodeOutcome::Unindexed);
        }

        let mut doc = builder.node_document(metadata);
        if metadata.is_content_indexed() {
            let cached = self.content.cached_document(tenant, metadata.id).await?;
            self.content
                .resolve_content(&model, metadata, cached.as_ref(), &mut doc);
            self.content
                .store_document(tenant, metadata.id, &doc)
                .await?;
        }
        ops.push(WriteOp::Add { doc, overwrite });
        Ok(NodeOutcome::Indexed)
    }

    /// Re-index descendants when the node's parent associations changed
    /// since it was last indexed.
    async fn cascade_if_moved(
        &self,
        session: &WriteSession,
        metadata: &NodeMetadata,
        overwrite: bool,
    ) -> Result<(), IndexerError> {
        let same_path = Query::term(FIELD_DBID, metadata.id)
            .and(Query::term(FIELD_PARENT_ASSOC_CRC, metadata.parent_assoc_crc));
        if self.engine.exists(&same_path)? {
            return Ok(());
        }
        if !self.engine.exists(&Query::term(FIELD_DBID, metadata.id))? {
            debug!(node_id = metadata.id, "Node not indexed yet, no cascade");
            return Ok(());
        }

        let key = (metadata.id, metadata.txn_id, metadata.parent_assoc_crc);
        if self.cascaded.lock().get(&key).is_some() {
            debug!(node_id = metadata.id, "Cascade already applied");
            return Ok(());
        }

        let mut visited = HashSet::from([metadata.id]);
        let count = self.cascade(session, metadata.id, overwrite, &mut visited).await?;
        self.cascaded.lock().put(key, ());
        self.stats.record_cascade(count);

        info!(
            node_id = metadata.id,
            parent_assoc_crc = metadata.parent_assoc_crc,
            descendants = count,
            "Cascaded path change"
        );
        Ok(())
    }

    /// Re-index every indexed descendant of `ancestor_id` from fresh
    /// metadata. `ANCESTOR` holds all ancestors, so one lookup finds the
    /// whole subtree.
    async fn cascade(
        &self,
        session: &WriteSession,
        ancestor_id: i64,
        overwrite: bool,
        visited: &mut HashSet<i64>,
    ) -> Result<u64, IndexerError> {
        let hits = self
            .engine
            .search(&Query::term(FIELD_ANCESTOR, ancestor_id))?;
        let ids: Vec<i64> = hits
            .iter()
            .filter_map(|hit| hit.doc.long(FIELD_DBID))
            .filter(|id| visited.insert(*id))
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let descendants = self
            .repository
            .get_nodes_metadata(&NodeSelector::Ids(ids.clone()))
            .await?;
        let found: HashSet<i64> = descendants.iter().map(|m| m.id).collect();

        let mut ops = Vec::new();
        for metadata in &descendants {
            self.stage_document(metadata, overwrite, &mut ops).await?;
        }
        for id in ids.iter().filter(|id| !found.contains(id)) {
            let tenant = self.indexed_tenant(*id)?;
            self.content.remove_document(&tenant, *id).await?;
            ops.push(WriteOp::DeleteByQuery(Query::term(FIELD_DBID, *id)));
        }
        session.stage(ops);

        Ok(ids.len() as u64)
    }

    async fn fetch_one(&self, node_id: i64) -> Result<Option<NodeMetadata>, IndexerError> {
        Ok(self
            .repository
            .get_nodes_metadata(&NodeSelector::single(node_id))
            .await?
            .into_iter()
            .next())
    }

    /// Tenant of the node's current document, or the default tenant.
    fn indexed_tenant(&self, node_id: i64) -> Result<String, IndexerError> {
        Ok(self
            .engine
            .search(&Query::term(FIELD_DBID, node_id))?
            .iter()
            .find_map(|hit| hit.doc.first(FIELD_TENANT).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_TENANT.to_string()))
    }

    fn record_failure(
        &self,
        session: &WriteSession,
        change: &ChangeRecord,
        error: &IndexerError,
        overwrite: bool,
    ) {
        warn!(
            node_id = change.id,
            txn_id = change.txn_id,
            error = %error,
            "Failed to index node, writing error marker"
        );
        self.stats.record_node_error();
        session.stage(vec![
            WriteOp::DeleteByQuery(Query::term(FIELD_DBID, change.id)),
            WriteOp::Add {
                doc: error_document(change, error),
                overwrite,
            },
        ]);
    }
}
