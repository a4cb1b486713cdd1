use super::{ChangeBatcher, CycleReport, Tracker};
use crate::document::tx_doc_id;
use crate::engine::WriteSession;
use crate::repository::LogWindow;
use crate::server::InformationServer;
use crate::IndexerError;
use async_trait::async_trait;
use indexsync_core::{TrackerConfig, TrackerState, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Pulls the transaction log: node changes, then transaction markers.
pub struct MetadataTracker {
    server: Arc<InformationServer>,
    config: TrackerConfig,
    running: Mutex<()>,
}

impl MetadataTracker {
    pub fn new(server: Arc<InformationServer>, config: TrackerConfig) -> Self {
        Self {
            server,
            config,
            running: Mutex::new(()),
        }
    }

    async fn cycle(
        &self,
        session: &WriteSession,
        state: &TrackerState,
    ) -> Result<CycleReport, IndexerError> {
        let mut report = CycleReport::default();
        let max_results = self.config.max_transactions_per_cycle.max(1);

        // Late arrivals committed before the cursor
        let cursor = (state.last_indexed_tx_commit_time, state.last_indexed_tx_id);
        let mut behind = LogWindow {
            after_commit_time: state.last_good_tx_commit_time_in_index,
            after_id: i64::MAX,
            until_commit_time: state.last_indexed_tx_commit_time,
            max_results,
        };
        let mut holes = Vec::new();
        loop {
            let page = self.server.repository().list_transactions_since(behind).await?;
            for txn in &page {
                if (txn.commit_time_ms, txn.id) < cursor
                    && !self.server.is_in_index(&tx_doc_id(txn.id))?
                {
                    if state.is_potential_tx_hole(txn.commit_time_ms) {
                        warn!(txn_id = txn.id, commit_time = txn.commit_time_ms, "Filling transaction hole");
                    }
                    holes.push(txn.clone());
                }
            }
            match page.last() {
                Some(last) if page.len() >= max_results => {
                    behind.after_commit_time = last.commit_time_ms;
                    behind.after_id = last.id;
                }
                _ => break,
            }
        }
        report.holes_filled = holes.len();
        self.index_transactions(session, &holes, &mut report).await?;

        let window = LogWindow {
            after_commit_time: state.last_indexed_tx_commit_time,
            after_id: state.last_indexed_tx_id,
            until_commit_time: state.time_to_stop_indexing,
            max_results,
        };
        let txns = self
            .server
            .repository()
            .list_transactions_since(window)
            .await?;
        report.exhausted = txns.len() < max_results;
        self.index_transactions(session, &txns, &mut report).await?;
        report.transactions = txns.len();

        Ok(report)
    }

    async fn index_transactions(
        &self,
        session: &WriteSession,
        txns: &[Transaction],
        report: &mut CycleReport,
    ) -> Result<(), IndexerError> {
        if txns.is_empty() {
            return Ok(());
        }

        let mut batcher = ChangeBatcher::default();
        for txn in txns {
            for change in self.server.repository().get_node_changes(txn.id).await? {
                batcher.add(change);
            }
        }
        let changes = batcher.take();
        debug!(transactions = txns.len(), nodes = changes.len(), "Indexing transactions");

        for chunk in changes.chunks(self.config.node_batch_size.max(1)) {
            let outcomes = self.server.index_nodes(session, chunk, true).await?;
            report.record_outcomes(&outcomes);
        }
        for txn in txns {
            self.server.index_transaction(session, txn, true)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Tracker for MetadataTracker {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn run_cycle(&self) -> Result<CycleReport, IndexerError> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("Metadata cycle already running");
            return Ok(CycleReport::skipped());
        };

        let state = self.server.tracker_initial_state()?;
        let session = self.server.session();
        match self.cycle(&session, &state).await {
            Ok(report) => {
                self.server.commit(session)?;
                if report.transactions > 0 || report.holes_filled > 0 {
                    info!(
                        transactions = report.transactions,
                        holes = report.holes_filled,
                        indexed = report.nodes_indexed,
                        deleted = report.nodes_deleted,
                        failed = report.nodes_failed,
                        "Metadata cycle complete"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Metadata cycle failed, rolling back");
                self.server.rollback(session);
                Err(e)
            }
        }
    }
}
