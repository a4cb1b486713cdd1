//! IndexSync Indexer
//!
//! This crate provides the synchronization engine, including:
//! - Index documents, queries and the index engine contract
//! - Node and ACL indexers with descendant cascades
//! - Content cache integration with deferred text extraction
//! - Tracker state stored as marker documents, with hole detection
//! - Read-only health checks of index consistency
//! - Metadata, ACL and content trackers

pub mod acl;
pub mod builder;
pub mod content;
pub mod document;
pub mod engine;
mod error;
pub mod health;
pub mod node;
pub mod query;
pub mod repository;
pub mod server;
pub mod state;
pub mod storage;
pub mod tracker;

pub use acl::AclIndexer;
pub use builder::DocumentBuilder;
pub use content::{ContentResolver, UncleanDocument};
pub use document::{DocType, Document};
pub use engine::{Hit, IndexEngine, MemoryIndex, WriteOp, WriteSession};
pub use error::IndexerError;
pub use health::{AclReport, HealthChecker, IdRange, IndexHealthReport, NodeReport};
pub use node::{NodeIndexer, NodeOutcome};
pub use query::Query;
pub use repository::{
    InMemoryRepository, LogWindow, NodeSelector, RepositoryClient, RepositoryData, StoredText,
};
pub use server::InformationServer;
pub use state::TrackerStateStore;
pub use storage::{ContentStore, FileContentStore, IndexSnapshot};
pub use tracker::{AclTracker, ChangeBatcher, ContentTracker, CycleReport, MetadataTracker, Tracker};
