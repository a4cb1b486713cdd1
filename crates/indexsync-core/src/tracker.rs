//! Tracker cursor state and the hole window.

use serde::{Deserialize, Serialize};

/// Wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Cursors recovered from the index marker documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerCursors {
    pub tx_id: i64,
    pub tx_commit_time: i64,
    pub change_set_id: i64,
    pub change_set_commit_time: i64,
}

impl TrackerCursors {
    /// Move the transaction cursor forward. Older positions are ignored.
    pub fn advance_tx(&mut self, tx_id: i64, commit_time: i64) -> bool {
        if (commit_time, tx_id) <= (self.tx_commit_time, self.tx_id) {
            return false;
        }
        self.tx_id = tx_id;
        self.tx_commit_time = commit_time;
        true
    }

    /// Move the change set cursor forward. Older positions are ignored.
    pub fn advance_change_set(&mut self, change_set_id: i64, commit_time: i64) -> bool {
        if (commit_time, change_set_id) <= (self.change_set_commit_time, self.change_set_id) {
            return false;
        }
        self.change_set_id = change_set_id;
        self.change_set_commit_time = commit_time;
        true
    }
}

/// Resumable position of the trackers plus the time horizons derived from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    pub last_indexed_tx_id: i64,
    pub last_indexed_tx_commit_time: i64,
    pub last_indexed_change_set_id: i64,
    pub last_indexed_change_set_commit_time: i64,
    /// Transactions committed after this instant are left for a later cycle.
    pub time_to_stop_indexing: i64,
    /// Commit times after this instant are outside the hole guarantee.
    pub time_before_which_no_holes: i64,
    pub last_good_tx_commit_time_in_index: i64,
    pub last_good_change_set_commit_time_in_index: i64,
}

impl TrackerState {
    /// Derive the full state from persisted cursors at time `now_ms`.
    pub fn derive(cursors: TrackerCursors, now_ms: i64, lag_ms: i64, hole_retention_ms: i64) -> Self {
        Self {
            last_indexed_tx_id: cursors.tx_id,
            last_indexed_tx_commit_time: cursors.tx_commit_time,
            last_indexed_change_set_id: cursors.change_set_id,
            last_indexed_change_set_commit_time: cursors.change_set_commit_time,
            time_to_stop_indexing: now_ms - lag_ms,
            time_before_which_no_holes: now_ms - hole_retention_ms,
            last_good_tx_commit_time_in_index: (cursors.tx_commit_time - hole_retention_ms).max(0),
            last_good_change_set_commit_time_in_index: (cursors.change_set_commit_time
                - hole_retention_ms)
                .max(0),
        }
    }

    /// A missing transaction with this commit time could be a genuine hole.
    pub fn is_potential_tx_hole(&self, commit_time: i64) -> bool {
        commit_time > self.last_good_tx_commit_time_in_index
            && commit_time <= self.time_before_which_no_holes
    }

    /// A missing change set with this commit time could be a genuine hole.
    pub fn is_potential_change_set_hole(&self, commit_time: i64) -> bool {
        commit_time > self.last_good_change_set_commit_time_in_index
            && commit_time <= self.time_before_which_no_holes
    }
}
