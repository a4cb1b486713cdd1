use super::{CycleReport, Tracker};
use crate::content::UncleanDocument;
use crate::engine::WriteSession;
use crate::node::NodeOutcome;
use crate::server::InformationServer;
use crate::IndexerError;
use async_trait::async_trait;
use indexsync_core::{ChangeRecord, NodeStatus, TrackerConfig};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Extracts text for documents whose content is `New` or `Dirty`.
///
/// A document whose refresh fails is set aside until it is indexed again
/// by a later transaction, so one bad document never holds up the rest.
pub struct ContentTracker {
    server: Arc<InformationServer>,
    config: TrackerConfig,
    /// Also the cycle guard
    failing: Mutex<HashSet<UncleanDocument>>,
}

impl ContentTracker {
    pub fn new(server: Arc<InformationServer>, config: TrackerConfig) -> Self {
        Self {
            server,
            config,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Re-index a node whose cached document is gone. The rebuilt document
    /// is cached again and its content refreshed on a later cycle.
    async fn rebuild(
        &self,
        session: &WriteSession,
        doc: &UncleanDocument,
        report: &mut CycleReport,
    ) -> Result<bool, IndexerError> {
        let change = ChangeRecord::new(doc.node_id, NodeStatus::Updated, doc.txn_id);
        let outcome = self.server.index_node(session, &change, true).await?;
        report.record_outcomes(&[outcome]);
        info!(
            node_id = doc.node_id,
            tenant = %doc.tenant,
            outcome = ?outcome,
            "Rebuilt missing cached document"
        );
        Ok(matches!(outcome, NodeOutcome::Indexed | NodeOutcome::Unindexed))
    }
}

#[async_trait]
impl Tracker for ContentTracker {
    fn name(&self) -> &'static str {
        "content"
    }

    async fn run_cycle(&self) -> Result<CycleReport, IndexerError> {
        let Ok(mut failing) = self.failing.try_lock() else {
            debug!("Content cycle already running");
            return Ok(CycleReport::skipped());
        };

        let unclean: HashSet<UncleanDocument> =
            self.server.docs_with_unclean_content()?.into_iter().collect();
        failing.retain(|doc| unclean.contains(doc));

        let mut pending: Vec<&UncleanDocument> =
            unclean.iter().filter(|doc| !failing.contains(*doc)).collect();
        pending.sort_by(|a, b| (a.node_id, &a.tenant).cmp(&(b.node_id, &b.tenant)));

        let batch_size = self.config.content_batch_size.max(1);
        let mut report = CycleReport {
            exhausted: pending.len() <= batch_size,
            ..Default::default()
        };

        let session = self.server.session();
        for doc in pending.into_iter().take(batch_size) {
            let refreshed = self
                .server
                .update_content_to_index_and_cache(&session, doc.node_id, &doc.tenant)
                .await;
            match refreshed {
                Ok(()) => report.content_refreshed += 1,
                Err(IndexerError::MissingCachedDocument { .. }) => {
                    if !self.rebuild(&session, doc, &mut report).await? {
                        failing.insert(doc.clone());
                    }
                }
                Err(e) => {
                    warn!(
                        node_id = doc.node_id,
                        tenant = %doc.tenant,
                        error = %e,
                        "Content refresh failed, skipping until re-indexed"
                    );
                    failing.insert(doc.clone());
                    report.content_failed += 1;
                }
            }
        }

        self.server.commit(session)?;
        if report.content_refreshed > 0 || report.content_failed > 0 || report.nodes_indexed > 0 {
            info!(
                refreshed = report.content_refreshed,
                rebuilt = report.nodes_indexed,
                failed = report.content_failed,
                skipped = failing.len(),
                "Content cycle complete"
            );
        }
        Ok(report)
    }
}
