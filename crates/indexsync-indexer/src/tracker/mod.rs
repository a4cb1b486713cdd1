//! Synchronization trackers.
//!
//! Each tracker pulls one repository log into the index. A cycle stages
//! all of its writes, then commits once; on failure the writes are rolled
//! back and the cursor stays where it was.

mod acl;
mod content;
mod metadata;

pub use acl::AclTracker;
pub use content::ContentTracker;
pub use metadata::MetadataTracker;

use crate::node::NodeOutcome;
use crate::IndexerError;
use async_trait::async_trait;
use indexsync_core::{ChangeRecord, NodeStatus};
use serde::Serialize;
use std::collections::HashMap;

#[async_trait]
pub trait Tracker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one cycle. Returns a skipped report when a cycle is already running.
    async fn run_cycle(&self) -> Result<CycleReport, IndexerError>;
}

/// What a cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub transactions: usize,
    pub change_sets: usize,
    pub nodes_indexed: usize,
    pub nodes_deleted: usize,
    pub nodes_failed: usize,
    pub acls_indexed: usize,
    pub content_refreshed: usize,
    pub content_failed: usize,
    /// Earlier entries found without a marker and indexed
    pub holes_filled: usize,
    /// The log had nothing more to offer inside the window
    pub exhausted: bool,
    pub skipped: bool,
}

impl CycleReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            exhausted: true,
            ..Default::default()
        }
    }

    fn record_outcomes(&mut self, outcomes: &[NodeOutcome]) {
        for outcome in outcomes {
            match outcome {
                NodeOutcome::Indexed | NodeOutcome::Unindexed => self.nodes_indexed += 1,
                NodeOutcome::Deleted => self.nodes_deleted += 1,
                NodeOutcome::Failed => self.nodes_failed += 1,
                NodeOutcome::Superseded | NodeOutcome::Missing => {}
            }
        }
    }
}

/// Collapses the node changes of several transactions to one change per
/// node. The latest transaction wins; a delete wins within a transaction.
#[derive(Debug, Default)]
pub struct ChangeBatcher {
    changes: Vec<ChangeRecord>,
    by_node: HashMap<i64, usize>,
}

impl ChangeBatcher {
    pub fn add(&mut self, change: ChangeRecord) {
        match self.by_node.get(&change.id) {
            Some(&i) => {
                let existing = &mut self.changes[i];
                if change.txn_id > existing.txn_id
                    || (change.txn_id == existing.txn_id && change.status == NodeStatus::Deleted)
                {
                    *existing = change;
                }
            }
            None => {
                self.by_node.insert(change.id, self.changes.len());
                self.changes.push(change);
            }
        }
    }

    pub fn take(&mut self) -> Vec<ChangeRecord> {
        self.by_node.clear();
        std::mem::take(&mut self.changes)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
