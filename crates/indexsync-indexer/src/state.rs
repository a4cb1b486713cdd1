//! Tracker state persisted as marker documents.
//!
//! Every indexed transaction leaves a `TX-<id>` marker and every ACL
//! change set an `ACLTX-<id>` marker. The newest position is also kept in
//! a single state document per log, written in the same batch as its
//! marker so the two are committed together. Positions staged but not yet
//! committed live in the caller's [`WriteSession`].

use crate::document::*;
use crate::engine::{IndexEngine, WriteOp, WriteSession};
use crate::query::Query;
use crate::IndexerError;
use indexsync_core::{now_ms, AclChangeSet, TrackerCursors, TrackerState, Transaction};
use std::sync::Arc;
use tracing::{debug, info};

pub struct TrackerStateStore {
    engine: Arc<dyn IndexEngine>,
    lag_ms: i64,
    hole_retention_ms: i64,
}

impl TrackerStateStore {
    pub fn new(engine: Arc<dyn IndexEngine>, lag_ms: i64, hole_retention_ms: i64) -> Self {
        Self {
            engine,
            lag_ms,
            hole_retention_ms,
        }
    }

    /// Cursors from the committed state documents. A missing state
    /// document is rebuilt from the newest marker of that log.
    pub fn read_cursors(&self) -> Result<TrackerCursors, IndexerError> {
        let (tx_id, tx_commit_time) = match self.engine.get(TX_STATE_DOC_ID)? {
            Some(doc) => (
                doc.long(FIELD_S_TXID).unwrap_or(0),
                doc.long(FIELD_S_TXCOMMITTIME).unwrap_or(0),
            ),
            None => self.newest_marker(FIELD_TXID, FIELD_TXCOMMITTIME)?,
        };
        let (change_set_id, change_set_commit_time) = match self.engine.get(ACL_STATE_DOC_ID)? {
            Some(doc) => (
                doc.long(FIELD_S_ACLTXID).unwrap_or(0),
                doc.long(FIELD_S_ACLTXCOMMITTIME).unwrap_or(0),
            ),
            None => self.newest_marker(FIELD_ACLTXID, FIELD_ACLTXCOMMITTIME)?,
        };

        Ok(TrackerCursors {
            tx_id,
            tx_commit_time,
            change_set_id,
            change_set_commit_time,
        })
    }

    pub fn tracker_initial_state(&self) -> Result<TrackerState, IndexerError> {
        self.tracker_state_at(now_ms())
    }

    pub fn tracker_state_at(&self, now_ms: i64) -> Result<TrackerState, IndexerError> {
        let cursors = self.read_cursors()?;
        let state = TrackerState::derive(cursors, now_ms, self.lag_ms, self.hole_retention_ms);
        debug!(
            tx_id = state.last_indexed_tx_id,
            tx_commit_time = state.last_indexed_tx_commit_time,
            change_set_id = state.last_indexed_change_set_id,
            change_set_commit_time = state.last_indexed_change_set_commit_time,
            "Derived tracker state"
        );
        Ok(state)
    }

    /// Marker for `txn`, plus the state document when it moves the
    /// session's cursor forward.
    pub fn transaction_marker_ops(
        &self,
        session: &WriteSession,
        txn: &Transaction,
        overwrite: bool,
    ) -> Result<Vec<WriteOp>, IndexerError> {
        let mut marker = Document::with_type(tx_doc_id(txn.id), DocType::Tx);
        marker.set(FIELD_TXID, txn.id);
        marker.set(FIELD_INTXID, txn.id);
        marker.set(FIELD_TXCOMMITTIME, txn.commit_time_ms);
        let mut ops = vec![WriteOp::Add {
            doc: marker,
            overwrite,
        }];

        let advanced = session.with_cursors(
            || self.read_cursors(),
            |cursors| cursors.advance_tx(txn.id, txn.commit_time_ms),
        )?;
        if advanced {
            let mut state = Document::with_type(TX_STATE_DOC_ID, DocType::State);
            state.set(FIELD_S_TXID, txn.id);
            state.set(FIELD_S_INTXID, txn.id);
            state.set(FIELD_S_TXCOMMITTIME, txn.commit_time_ms);
            ops.push(WriteOp::Add {
                doc: state,
                overwrite: true,
            });
        }
        Ok(ops)
    }

    /// Marker for `change_set`, plus the state document when it moves the
    /// session's cursor forward.
    pub fn change_set_marker_ops(
        &self,
        session: &WriteSession,
        change_set: &AclChangeSet,
        overwrite: bool,
    ) -> Result<Vec<WriteOp>, IndexerError> {
        let mut marker = Document::with_type(acl_tx_doc_id(change_set.id), DocType::AclTx);
        marker.set(FIELD_ACLTXID, change_set.id);
        marker.set(FIELD_INACLTXID, change_set.id);
        marker.set(FIELD_ACLTXCOMMITTIME, change_set.commit_time_ms);
        let mut ops = vec![WriteOp::Add {
            doc: marker,
            overwrite,
        }];

        let advanced = session.with_cursors(
            || self.read_cursors(),
            |cursors| cursors.advance_change_set(change_set.id, change_set.commit_time_ms),
        )?;
        if advanced {
            let mut state = Document::with_type(ACL_STATE_DOC_ID, DocType::State);
            state.set(FIELD_S_ACLTXID, change_set.id);
            state.set(FIELD_S_INACLTXID, change_set.id);
            state.set(FIELD_S_ACLTXCOMMITTIME, change_set.commit_time_ms);
            ops.push(WriteOp::Add {
                doc: state,
                overwrite: true,
            });
        }
        Ok(ops)
    }

    /// Stage the transaction marker and tracker state in one batch.
    pub fn index_transaction(
        &self,
        session: &WriteSession,
        txn: &Transaction,
        overwrite: bool,
    ) -> Result<(), IndexerError> {
        let ops = self.transaction_marker_ops(session, txn, overwrite)?;
        session.stage(ops);
        debug!(txn_id = txn.id, commit_time = txn.commit_time_ms, "Staged transaction marker");
        Ok(())
    }

    /// Stage the change set marker and ACL tracker state in one batch.
    pub fn index_acl_transaction(
        &self,
        session: &WriteSession,
        change_set: &AclChangeSet,
        overwrite: bool,
    ) -> Result<(), IndexerError> {
        let ops = self.change_set_marker_ops(session, change_set, overwrite)?;
        session.stage(ops);
        debug!(
            change_set_id = change_set.id,
            commit_time = change_set.commit_time_ms,
            "Staged change set marker"
        );
        Ok(())
    }

    fn newest_marker(&self, id_field: &str, time_field: &str) -> Result<(i64, i64), IndexerError> {
        let newest = self
            .engine
            .search(&Query::exists(id_field))?
            .iter()
            .filter_map(|hit| Some((hit.doc.long(time_field)?, hit.doc.long(id_field)?)))
            .max();

        Ok(match newest {
            Some((commit_time, id)) => {
                info!(field = id_field, id, commit_time, "Rebuilt tracker cursor from markers");
                (id, commit_time)
            }
            None => (0, 0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryIndex;

    fn store() -> (Arc<MemoryIndex>, TrackerStateStore) {
        let index = Arc::new(MemoryIndex::new());
        let store = TrackerStateStore::new(index.clone(), 1_000, 3_600_000);
        (index, store)
    }

    #[test]
    fn test_empty_index_starts_at_zero() {
        let (_, store) = store();
        let state = store.tracker_state_at(10_000_000).unwrap();
        assert_eq!(state.last_indexed_tx_id, 0);
        assert_eq!(state.last_good_tx_commit_time_in_index, 0);
        assert_eq!(state.time_to_stop_indexing, 9_999_000);
    }

    #[test]
    fn test_state_document_tracks_newest() {
        let (index, store) = store();
        let session = WriteSession::new(index.clone());
        store
            .index_transaction(&session, &Transaction::new(5, 5_000), true)
            .unwrap();
        session.commit().unwrap();

        let session = WriteSession::new(index.clone());
        store
            .index_transaction(&session, &Transaction::new(3, 3_000), true)
            .unwrap();
        session.commit().unwrap();

        let cursors = store.read_cursors().unwrap();
        assert_eq!((cursors.tx_id, cursors.tx_commit_time), (5, 5_000));
        assert!(index.get(&tx_doc_id(3)).unwrap().is_some());
    }

    #[test]
    fn test_older_transaction_in_same_batch_keeps_newest() {
        let (index, store) = store();
        let session = WriteSession::new(index.clone());
        store
            .index_transaction(&session, &Transaction::new(8, 8_000), true)
            .unwrap();
        store
            .index_transaction(&session, &Transaction::new(7, 7_000), true)
            .unwrap();
        session.commit().unwrap();

        assert_eq!(store.read_cursors().unwrap().tx_id, 8);
    }

    #[test]
    fn test_cursor_rebuilt_from_markers() {
        let (index, store) = store();
        let session = WriteSession::new(index.clone());
        store
            .index_transaction(&session, &Transaction::new(2, 2_000), true)
            .unwrap();
        store
            .index_transaction(&session, &Transaction::new(4, 4_000), true)
            .unwrap();
        store
            .index_acl_transaction(&session, &AclChangeSet::new(9, 1_500), true)
            .unwrap();
        session.commit().unwrap();
        index
            .commit(vec![
                WriteOp::DeleteById(TX_STATE_DOC_ID.to_string()),
                WriteOp::DeleteById(ACL_STATE_DOC_ID.to_string()),
            ])
            .unwrap();

        let cursors = store.read_cursors().unwrap();
        assert_eq!((cursors.tx_id, cursors.tx_commit_time), (4, 4_000));
        assert_eq!(
            (cursors.change_set_id, cursors.change_set_commit_time),
            (9, 1_500)
        );
    }

    #[test]
    fn test_rolled_back_position_is_not_remembered() {
        let (index, store) = store();
        let session = WriteSession::new(index.clone());
        store
            .index_transaction(&session, &Transaction::new(6, 6_000), true)
            .unwrap();
        session.rollback();

        let session = WriteSession::new(index);
        let ops = store
            .transaction_marker_ops(&session, &Transaction::new(6, 6_000), true)
            .unwrap();
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_sessions_track_their_own_cursor() {
        let (index, store) = store();
        let metadata = WriteSession::new(index.clone());
        let acl = WriteSession::new(index.clone());

        store
            .index_transaction(&metadata, &Transaction::new(10, 10_000), true)
            .unwrap();
        store
            .index_acl_transaction(&acl, &AclChangeSet::new(3, 9_000), true)
            .unwrap();
        acl.rollback();
        metadata.commit().unwrap();

        let cursors = store.read_cursors().unwrap();
        assert_eq!(cursors.tx_id, 10);
        assert_eq!(cursors.change_set_id, 0);
        assert!(index.get(&tx_doc_id(10)).unwrap().is_some());
    }
}
