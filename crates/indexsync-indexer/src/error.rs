//! Indexer error types.

use indexsync_core::CoreError;
use thiserror::Error;

/// Errors that can occur during synchronization.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The repository could not be reached or refused the request
    #[error("Repository error: {0}")]
    Repository(String),

    /// The index engine rejected a read or write
    #[error("Index error: {0}")]
    Index(String),

    /// The content cache failed
    #[error("Content store error: {0}")]
    ContentStore(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Content refresh requested for a node with nothing cached
    #[error("No cached document for node {node_id} in tenant {tenant}")]
    MissingCachedDocument { tenant: String, node_id: i64 },

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Schema model failure
    #[error("Model error: {0}")]
    Model(#[from] CoreError),
}

impl IndexerError {
    /// Failures worth retrying on the next cycle without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IndexerError::Repository(_) | IndexerError::ContentStore(_) | IndexerError::Io(_)
        )
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for IndexerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for IndexerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexerError::MissingCachedDocument {
            tenant: "_DEFAULT_".to_string(),
            node_id: 12,
        };
        assert!(err.to_string().contains("node 12"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(IndexerError::Repository("timeout".into()).is_transient());
        assert!(!IndexerError::Index("closed".into()).is_transient());

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: IndexerError = io_err.into();
        assert!(matches!(err, IndexerError::Io(_)));
        assert!(err.is_transient());
    }
}
