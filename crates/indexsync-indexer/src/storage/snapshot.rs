//! Index snapshot file.

use crate::document::Document;
use crate::IndexerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Committed index contents written after each commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub next_position: u64,
    pub documents: Vec<(u64, Document)>,
    pub saved_at: DateTime<Utc>,
}

impl IndexSnapshot {
    pub fn new(next_position: u64, documents: Vec<(u64, Document)>) -> Self {
        Self {
            next_position,
            documents,
            saved_at: Utc::now(),
        }
    }

    /// Write the snapshot with an atomic rename.
    pub fn save(&self, path: &Path) -> Result<(), IndexerError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let data = rmp_serde::to_vec(self)?;
        let temp_path = path.with_extension("msgpack.tmp");
        std::fs::write(&temp_path, &data)?;
        std::fs::rename(&temp_path, path)?;

        debug!(path = ?path, size = data.len(), documents = self.documents.len(), "Saved index snapshot");
        Ok(())
    }

    /// Read a snapshot; `None` when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>, IndexerError> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(path)?;
        Ok(Some(rmp_serde::from_slice(&data)?))
    }
}
