//! Index engine contract.
//!
//! The synchronizer never owns the full-text index; it only needs to add
//! and delete documents, commit groups of writes and run simple lookups.
//! Writes are staged in a [`WriteSession`] owned by one tracker cycle and
//! reach the engine in a single [`IndexEngine::commit`]; reads see the
//! last committed state.

mod memory;
mod session;

pub use memory::MemoryIndex;
pub use session::WriteSession;

use crate::document::Document;
use crate::query::Query;
use crate::IndexerError;

/// A staged index mutation.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Add a document. With `overwrite`, documents sharing its id are replaced.
    Add { doc: Document, overwrite: bool },
    DeleteById(String),
    DeleteByQuery(Query),
}

/// A search result with its internal index position.
#[derive(Debug, Clone)]
pub struct Hit {
    pub position: u64,
    pub doc: Document,
}

pub trait IndexEngine: Send + Sync {
    /// Apply a group of writes in order. Readers observe the whole group
    /// at once or not at all.
    fn commit(&self, ops: Vec<WriteOp>) -> Result<(), IndexerError>;

    /// Committed documents matching the query, in position order.
    fn search(&self, query: &Query) -> Result<Vec<Hit>, IndexerError>;

    fn get(&self, id: &str) -> Result<Option<Document>, IndexerError>;

    fn exists(&self, query: &Query) -> Result<bool, IndexerError> {
        Ok(!self.search(query)?.is_empty())
    }

    fn count(&self, query: &Query) -> Result<usize, IndexerError> {
        Ok(self.search(query)?.len())
    }
}
