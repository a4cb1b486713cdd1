//! Information server: one entry point over the indexers, the tracker
//! state store and the health checker, shared by every tracker.

use crate::acl::AclIndexer;
use crate::content::{docs_with_unclean_content, ContentResolver, UncleanDocument};
use crate::document::*;
use crate::engine::{IndexEngine, WriteOp, WriteSession};
use crate::health::{AclReport, HealthChecker, IdRange, IndexHealthReport, NodeReport};
use crate::node::{NodeIndexer, NodeOutcome};
use crate::query::Query;
use crate::repository::RepositoryClient;
use crate::state::TrackerStateStore;
use crate::storage::ContentStore;
use crate::IndexerError;
use indexsync_core::{
    AclChangeSet, AclReaders, ChangeRecord, ModelHandle, StatsSnapshot, SyncConfig, TrackerState,
    TrackerStats, Transaction,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct InformationServer {
    engine: Arc<dyn IndexEngine>,
    repository: Arc<dyn RepositoryClient>,
    model: ModelHandle,
    stats: Arc<TrackerStats>,
    state: Arc<TrackerStateStore>,
    nodes: NodeIndexer,
    acls: AclIndexer,
    health: HealthChecker,
}

impl InformationServer {
    pub fn new(
        config: &SyncConfig,
        engine: Arc<dyn IndexEngine>,
        store: Arc<dyn ContentStore>,
        repository: Arc<dyn RepositoryClient>,
        model: ModelHandle,
    ) -> Self {
        let stats = Arc::new(TrackerStats::new());
        let state = Arc::new(TrackerStateStore::new(
            engine.clone(),
            config.lag_ms,
            config.hole_retention_ms,
        ));
        let content = Arc::new(ContentResolver::new(
            store,
            repository.clone(),
            model.clone(),
            config.transform_content,
            config.default_locale.clone(),
            stats.clone(),
        ));
        let nodes = NodeIndexer::new(
            engine.clone(),
            repository.clone(),
            content,
            model.clone(),
            config.default_locale.clone(),
            config.tracker.cascade_cache_size,
            stats.clone(),
        );

        Self {
            acls: AclIndexer::new(state.clone()),
            health: HealthChecker::new(engine.clone()),
            engine,
            repository,
            model,
            stats,
            state,
            nodes,
        }
    }

    pub fn repository(&self) -> &Arc<dyn RepositoryClient> {
        &self.repository
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Start a unit of work. Its writes stay private until committed.
    pub fn session(&self) -> WriteSession {
        WriteSession::new(self.engine.clone())
    }

    // Indexing

    pub async fn index_node(
        &self,
        session: &WriteSession,
        change: &ChangeRecord,
        overwrite: bool,
    ) -> Result<NodeOutcome, IndexerError> {
        self.nodes.index_node(session, change, overwrite).await
    }

    pub async fn index_nodes(
        &self,
        session: &WriteSession,
        changes: &[ChangeRecord],
        overwrite: bool,
    ) -> Result<Vec<NodeOutcome>, IndexerError> {
        self.nodes.index_nodes(session, changes, overwrite).await
    }

    pub async fn update_content_to_index_and_cache(
        &self,
        session: &WriteSession,
        node_id: i64,
        tenant: &str,
    ) -> Result<(), IndexerError> {
        self.nodes
            .update_content_to_index_and_cache(session, node_id, tenant)
            .await
    }

    pub fn docs_with_unclean_content(&self) -> Result<Vec<UncleanDocument>, IndexerError> {
        docs_with_unclean_content(self.engine.as_ref())
    }

    pub fn index_acl(
        &self,
        session: &WriteSession,
        acls: &[AclReaders],
        overwrite: bool,
    ) -> Result<Duration, IndexerError> {
        self.acls.index_acl(session, acls, overwrite)
    }

    pub fn index_acl_transaction(
        &self,
        session: &WriteSession,
        change_set: &AclChangeSet,
        overwrite: bool,
    ) -> Result<(), IndexerError> {
        self.acls.index_acl_transaction(session, change_set, overwrite)
    }

    pub fn index_transaction(
        &self,
        session: &WriteSession,
        txn: &Transaction,
        overwrite: bool,
    ) -> Result<(), IndexerError> {
        self.state.index_transaction(session, txn, overwrite)
    }

    // Tracker state

    pub fn tracker_initial_state(&self) -> Result<TrackerState, IndexerError> {
        self.state.tracker_initial_state()
    }

    pub fn tracker_state_at(&self, now_ms: i64) -> Result<TrackerState, IndexerError> {
        self.state.tracker_state_at(now_ms)
    }

    // Health

    pub fn check_node_common(&self, node_id: i64) -> Result<NodeReport, IndexerError> {
        self.health.check_node_common(node_id)
    }

    pub fn check_acl_in_index(&self, acl_id: i64) -> Result<AclReport, IndexerError> {
        self.health.check_acl_in_index(acl_id)
    }

    pub fn check_index_transactions(
        &self,
        transactions: &IdRange,
        change_sets: &IdRange,
    ) -> Result<IndexHealthReport, IndexerError> {
        self.health
            .check_index_transactions(transactions, change_sets)
    }

    pub fn error_doc_ids(&self) -> Result<BTreeSet<i64>, IndexerError> {
        self.health.error_doc_ids()
    }

    pub fn doc_set_size(&self, txn_id: i64, commit_time: i64) -> Result<usize, IndexerError> {
        self.health.doc_set_size(txn_id, commit_time)
    }

    pub fn is_in_index(&self, doc_id: &str) -> Result<bool, IndexerError> {
        self.health.is_in_index(doc_id)
    }

    // Maintenance

    /// Remove every document of a node, including error markers.
    pub fn delete_by_node_id(&self, session: &WriteSession, node_id: i64) {
        info!(node_id, "Deleting node documents");
        session.delete_by_query(&Query::term(FIELD_DBID, node_id));
    }

    pub fn delete_by_acl_id(&self, session: &WriteSession, acl_id: i64) {
        info!(acl_id, "Deleting ACL document");
        session.delete_by_query(
            &Query::term(FIELD_ACLID, acl_id)
                .and(Query::term(FIELD_DOC_TYPE, DocType::Acl.as_str())),
        );
    }

    /// Remove a transaction marker and the node documents it indexed.
    pub fn delete_by_transaction_id(&self, session: &WriteSession, txn_id: i64) {
        info!(txn_id, "Deleting transaction documents");
        session.stage(vec![
            WriteOp::DeleteByQuery(Query::term(FIELD_TXID, txn_id)),
            WriteOp::DeleteByQuery(Query::term(FIELD_INTXID, txn_id)),
        ]);
    }

    /// Remove a change set marker and the ACL documents it indexed.
    pub fn delete_by_acl_change_set_id(&self, session: &WriteSession, change_set_id: i64) {
        info!(change_set_id, "Deleting change set documents");
        session.stage(vec![
            WriteOp::DeleteByQuery(Query::term(FIELD_ACLTXID, change_set_id)),
            WriteOp::DeleteByQuery(Query::term(FIELD_INACLTXID, change_set_id)),
        ]);
    }

    pub fn commit(&self, session: WriteSession) -> Result<usize, IndexerError> {
        session.commit()
    }

    /// Discard the session's writes and forget the cascades they recorded.
    pub fn rollback(&self, session: WriteSession) {
        let discarded = session.rollback();
        self.nodes.forget_cascades();
        debug!(ops = discarded, "Rolled back index");
    }
}
