//! Writes staged by one unit of work.

use super::{IndexEngine, WriteOp};
use crate::document::Document;
use crate::query::Query;
use crate::IndexerError;
use indexsync_core::TrackerCursors;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Staged {
    ops: Vec<WriteOp>,
    /// Newest positions staged so far, seeded from the committed cursors
    cursors: Option<TrackerCursors>,
}

/// Staged writes of a single tracker cycle.
///
/// Sessions are independent: committing or rolling back one never touches
/// the writes of another, so trackers sharing an engine can run
/// concurrently.
pub struct WriteSession {
    engine: Arc<dyn IndexEngine>,
    staged: Mutex<Staged>,
}

impl WriteSession {
    pub fn new(engine: Arc<dyn IndexEngine>) -> Self {
        Self {
            engine,
            staged: Mutex::new(Staged::default()),
        }
    }

    pub fn stage(&self, ops: Vec<WriteOp>) {
        self.staged.lock().ops.extend(ops);
    }

    pub fn add_document(&self, doc: Document, overwrite: bool) {
        self.stage(vec![WriteOp::Add { doc, overwrite }]);
    }

    pub fn delete_by_id(&self, id: &str) {
        self.stage(vec![WriteOp::DeleteById(id.to_string())]);
    }

    pub fn delete_by_query(&self, query: &Query) {
        self.stage(vec![WriteOp::DeleteByQuery(query.clone())]);
    }

    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.staged.lock().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the session's cursors. The first call seeds them
    /// from `committed`.
    pub(crate) fn with_cursors<R>(
        &self,
        committed: impl FnOnce() -> Result<TrackerCursors, IndexerError>,
        f: impl FnOnce(&mut TrackerCursors) -> R,
    ) -> Result<R, IndexerError> {
        let mut staged = self.staged.lock();
        if staged.cursors.is_none() {
            staged.cursors = Some(committed()?);
        }
        Ok(f(staged.cursors.get_or_insert_with(TrackerCursors::default)))
    }

    /// Hand every staged write to the engine in one group.
    pub fn commit(self) -> Result<usize, IndexerError> {
        let ops = self.staged.into_inner().ops;
        let applied = ops.len();
        self.engine.commit(ops)?;
        debug!(ops = applied, "Committed write session");
        Ok(applied)
    }

    /// Discard every staged write. Returns how many were dropped.
    pub fn rollback(self) -> usize {
        let discarded = self.staged.into_inner().ops.len();
        if discarded > 0 {
            debug!(ops = discarded, "Rolled back write session");
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FIELD_DBID;
    use crate::engine::MemoryIndex;

    fn node(id: &str, dbid: i64) -> Document {
        let mut doc = Document::new(id);
        doc.set(FIELD_DBID, dbid);
        doc
    }

    #[test]
    fn test_writes_invisible_until_commit() {
        let index = Arc::new(MemoryIndex::new());
        let session = WriteSession::new(index.clone());
        session.add_document(node("a", 1), true);
        assert!(index.get("a").unwrap().is_none());
        assert_eq!(session.len(), 1);

        assert_eq!(session.commit().unwrap(), 1);
        assert!(index.get("a").unwrap().is_some());
    }

    #[test]
    fn test_rollback_leaves_other_sessions_alone() {
        let index = Arc::new(MemoryIndex::new());
        let first = WriteSession::new(index.clone());
        let second = WriteSession::new(index.clone());

        first.add_document(node("a", 1), true);
        second.add_document(node("b", 2), true);
        assert_eq!(second.rollback(), 1);
        first.commit().unwrap();

        assert!(index.get("a").unwrap().is_some());
        assert!(index.get("b").unwrap().is_none());
    }

    #[test]
    fn test_cursors_seeded_once() {
        let index = Arc::new(MemoryIndex::new());
        let session = WriteSession::new(index);
        let seed = TrackerCursors {
            tx_id: 3,
            tx_commit_time: 300,
            ..Default::default()
        };

        let moved = session
            .with_cursors(|| Ok(seed), |c| c.advance_tx(4, 400))
            .unwrap();
        assert!(moved);

        let tx_id = session
            .with_cursors(|| Ok(TrackerCursors::default()), |c| c.tx_id)
            .unwrap();
        assert_eq!(tx_id, 4);
    }
}
