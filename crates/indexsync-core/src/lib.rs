//! IndexSync Core Components
//!
//! This crate provides the shared vocabulary of the synchronizer:
//! the repository data model, the field/schema model, tracker state,
//! configuration and statistics.

mod config;
mod error;
mod metrics;
pub mod model;
pub mod schema;
mod tracker;

pub use config::{SyncConfig, TrackerConfig};
pub use error::CoreError;
pub use metrics::{StatsSnapshot, TrackerStats};
pub use model::{
    qualify_authority, qualify_authority_as, tenant_id, AclChangeSet, AclReaders, AuthorityType,
    ChangeRecord, ContentRef, ContentStatus, FtsStatus, NodeMetadata, NodeStatus, ParentAssoc,
    PropertyValue, TextContent, Transaction, DEFAULT_TENANT,
};
pub use schema::{
    ContentFieldType, DataModel, FieldInstance, IndexedField, ModelDefinition, ModelHandle,
};
pub use tracker::{now_ms, TrackerCursors, TrackerState};
