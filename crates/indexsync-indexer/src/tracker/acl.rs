use super::{CycleReport, Tracker};
use crate::document::acl_tx_doc_id;
use crate::engine::WriteSession;
use crate::repository::LogWindow;
use crate::server::InformationServer;
use crate::IndexerError;
use async_trait::async_trait;
use indexsync_core::{AclChangeSet, TrackerConfig, TrackerState};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Pulls the ACL change set log.
pub struct AclTracker {
    server: Arc<InformationServer>,
    config: TrackerConfig,
    running: Mutex<()>,
}

impl AclTracker {
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
        let max_results = self.config.max_change_sets_per_cycle.max(1);
        let repository = self.server.repository();

        let cursor = (
            state.last_indexed_change_set_commit_time,
            state.last_indexed_change_set_id,
        );
        let mut behind = LogWindow {
            after_commit_time: state.last_good_change_set_commit_time_in_index,
            after_id: i64::MAX,
            until_commit_time: state.last_indexed_change_set_commit_time,
            max_results,
        };
        loop {
            let page = repository.list_acl_change_sets_since(behind).await?;
            for change_set in &page {
                if (change_set.commit_time_ms, change_set.id) < cursor
                    && !self.server.is_in_index(&acl_tx_doc_id(change_set.id))?
                {
                    if state.is_potential_change_set_hole(change_set.commit_time_ms) {
                        warn!(change_set_id = change_set.id, "Filling change set hole");
                    }
                    report.acls_indexed += self.index_change_set(session, change_set).await?;
                    report.holes_filled += 1;
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

        let window = LogWindow {
            after_commit_time: state.last_indexed_change_set_commit_time,
            after_id: state.last_indexed_change_set_id,
            until_commit_time: state.time_to_stop_indexing,
            max_results,
        };
        let change_sets = repository.list_acl_change_sets_since(window).await?;
        report.exhausted = change_sets.len() < max_results;
        for change_set in &change_sets {
            report.acls_indexed += self.index_change_set(session, change_set).await?;
        }
        report.change_sets = change_sets.len();

        Ok(report)
    }

    async fn index_change_set(
        &self,
        session: &WriteSession,
        change_set: &AclChangeSet,
    ) -> Result<usize, IndexerError> {
        let repository = self.server.repository();
        let acl_ids = repository.get_acls_for_change_set(change_set.id).await?;
        let readers = if acl_ids.is_empty() {
            Vec::new()
        } else {
            repository.get_acl_readers(&acl_ids).await?
        };

        let elapsed = self.server.index_acl(session, &readers, true)?;
        self.server.index_acl_transaction(session, change_set, true)?;
        debug!(
            change_set_id = change_set.id,
            acls = readers.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "Indexed change set"
        );
        Ok(readers.len())
    }
}

#[async_trait]
impl Tracker for AclTracker {
    fn name(&self) -> &'static str {
        "acl"
    }

    async fn run_cycle(&self) -> Result<CycleReport, IndexerError> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("ACL cycle already running");
            return Ok(CycleReport::skipped());
        };

        let state = self.server.tracker_initial_state()?;
        let session = self.server.session();
        match self.cycle(&session, &state).await {
            Ok(report) => {
                self.server.commit(session)?;
                if report.change_sets > 0 || report.holes_filled > 0 {
                    info!(
                        change_sets = report.change_sets,
                        holes = report.holes_filled,
                        acls = report.acls_indexed,
                        "ACL cycle complete"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "ACL cycle failed, rolling back");
                self.server.rollback(session);
                Err(e)
            }
        }
    }
}
