//! In-process index engine with an optional durable snapshot.

use super::{Hit, IndexEngine, WriteOp};
use crate::document::Document;
use crate::query::Query;
use crate::storage::IndexSnapshot;
use crate::IndexerError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct IndexState {
    docs: BTreeMap<u64, Document>,
    ids: HashMap<String, Vec<u64>>,
    next_position: u64,
}

impl IndexState {
    fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        let mut state = IndexState {
            next_position: snapshot.next_position,
            ..Default::default()
        };
        for (position, doc) in snapshot.documents {
            state.ids.entry(doc.id.clone()).or_default().push(position);
            state.docs.insert(position, doc);
        }
        state
    }

    fn to_snapshot(&self) -> IndexSnapshot {
        IndexSnapshot::new(
            self.next_position,
            self.docs.iter().map(|(p, d)| (*p, d.clone())).collect(),
        )
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::Add { doc, overwrite } => {
                if overwrite {
                    self.remove_id(&doc.id);
                }
                let position = self.next_position;
                self.next_position += 1;
                self.ids.entry(doc.id.clone()).or_default().push(position);
                self.docs.insert(position, doc);
            }
            WriteOp::DeleteById(id) => self.remove_id(&id),
            WriteOp::DeleteByQuery(query) => {
                let positions: Vec<u64> = self
                    .docs
                    .iter()
                    .filter(|(_, doc)| query.matches(doc))
                    .map(|(position, _)| *position)
                    .collect();
                for position in positions {
                    self.remove_position(position);
                }
            }
        }
    }

    fn remove_id(&mut self, id: &str) {
        if let Some(positions) = self.ids.remove(id) {
            for position in positions {
                self.docs.remove(&position);
            }
        }
    }

    fn remove_position(&mut self, position: u64) {
        if let Some(doc) = self.docs.remove(&position) {
            if let Some(positions) = self.ids.get_mut(&doc.id) {
                positions.retain(|p| *p != position);
                if positions.is_empty() {
                    self.ids.remove(&doc.id);
                }
            }
        }
    }
}

/// Document store whose commits apply a group of writes atomically.
///
/// When opened on a path, every commit rewrites the snapshot file.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    state: RwLock<IndexState>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryIndex {
    /// A purely in-memory index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a durable index, loading the snapshot if one exists.
    pub fn open(path: PathBuf) -> Result<Self, IndexerError> {
        let state = match IndexSnapshot::load(&path)? {
            Some(snapshot) => {
                info!(
                    path = ?path,
                    documents = snapshot.documents.len(),
                    saved_at = %snapshot.saved_at,
                    "Loaded index snapshot"
                );
                IndexState::from_snapshot(snapshot)
            }
            None => IndexState::default(),
        };

        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
        })
    }

    /// Number of committed documents.
    pub fn len(&self) -> usize {
        self.state.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexEngine for MemoryIndex {
    fn commit(&self, ops: Vec<WriteOp>) -> Result<(), IndexerError> {
        let mut state = self.state.write();
        let applied = ops.len();
        for op in ops {
            state.apply(op);
        }

        if let Some(path) = &self.snapshot_path {
            state.to_snapshot().save(path)?;
        }

        debug!(ops = applied, documents = state.docs.len(), "Committed index");
        Ok(())
    }

    fn search(&self, query: &Query) -> Result<Vec<Hit>, IndexerError> {
        let state = self.state.read();
        Ok(state
            .docs
            .iter()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(position, doc)| Hit {
                position: *position,
                doc: doc.clone(),
            })
            .collect())
    }

    fn get(&self, id: &str) -> Result<Option<Document>, IndexerError> {
        let state = self.state.read();
        Ok(state
            .ids
            .get(id)
            .and_then(|positions| positions.last())
            .and_then(|position| state.docs.get(position))
            .cloned())
    }
}
