//! Repository data model.
//!
//! Snapshots of what the repository reports: transactions, node change
//! records, node metadata and ACL readers. The repository owns all of
//! these; the synchronizer only ever holds immutable copies.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Tenant value stored in the index for the default (empty) tenant.
pub const DEFAULT_TENANT: &str = "_DEFAULT_";

/// Property that excludes a node from the index when set to `false`.
pub const PROP_IS_INDEXED: &str = "cm:isIndexed";

/// Property that excludes a node's content from extraction when `false`.
pub const PROP_IS_CONTENT_INDEXED: &str = "cm:isContentIndexed";

/// Property holding the node's locale.
pub const PROP_LOCALE: &str = "cm:locale";

/// Type given to the placeholder metadata of a deleted node.
pub const TYPE_DELETED: &str = "sys:deleted";

/// Map the repository tenant domain to the value stored in the index.
pub fn tenant_id(tenant: &str) -> &str {
    if tenant.is_empty() {
        DEFAULT_TENANT
    } else {
        tenant
    }
}

/// Status of a node within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    New,
    Updated,
    Deleted,
    Unknown,
}

impl NodeStatus {
    /// Whether the node's current document must be removed.
    pub fn is_removal(self) -> bool {
        matches!(self, NodeStatus::Deleted | NodeStatus::Unknown)
    }

    /// Whether fresh metadata must be fetched and indexed.
    pub fn needs_update(self) -> bool {
        matches!(
            self,
            NodeStatus::New | NodeStatus::Updated | NodeStatus::Unknown
        )
    }
}

/// A node change reported by the repository log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: i64,
    pub status: NodeStatus,
    pub txn_id: i64,
}

impl ChangeRecord {
    pub fn new(id: i64, status: NodeStatus, txn_id: i64) -> Self {
        Self { id, status, txn_id }
    }
}

/// A committed repository transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub commit_time_ms: i64,
    #[serde(default)]
    pub updates: u64,
    #[serde(default)]
    pub deletes: u64,
}

impl Transaction {
    pub fn new(id: i64, commit_time_ms: i64) -> Self {
        Self {
            id,
            commit_time_ms,
            updates: 0,
            deletes: 0,
        }
    }
}

/// A committed ACL change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclChangeSet {
    pub id: i64,
    pub commit_time_ms: i64,
    #[serde(default)]
    pub acl_count: u64,
}

impl AclChangeSet {
    pub fn new(id: i64, commit_time_ms: i64) -> Self {
        Self {
            id,
            commit_time_ms,
            acl_count: 0,
        }
    }
}

/// Reference to a node's binary content. The bytes are fetched lazily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub content_id: i64,
    pub mimetype: String,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub length: i64,
}

/// A property value as reported by the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Text(String),
    /// Locale to text.
    MlText(BTreeMap<String, String>),
    Content(ContentRef),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Boolean reading of a text value; anything but "true" is false.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_text().map(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Visit every content reference, descending into lists.
    pub fn content_refs(&self) -> Vec<&ContentRef> {
        match self {
            PropertyValue::Content(content) => vec![content],
            PropertyValue::List(values) => values.iter().flat_map(|v| v.content_refs()).collect(),
            _ => Vec::new(),
        }
    }
}

/// One of the node's parent associations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentAssoc {
    pub parent_id: i64,
    pub assoc_type: String,
    pub assoc_name: String,
    #[serde(default)]
    pub is_primary: bool,
}

/// Metadata snapshot for a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub id: i64,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub acl_id: i64,
    pub node_type: String,
    #[serde(default)]
    pub aspects: BTreeSet<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    pub parent_assocs: Vec<ParentAssoc>,
    /// Ancestor ids, nearest first.
    #[serde(default)]
    pub ancestors: Vec<i64>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub parent_assoc_crc: i64,
    pub txn_id: i64,
    #[serde(default)]
    pub owner: Option<String>,
}

impl NodeMetadata {
    /// Empty stand-in for a node the repository reports as deleted.
    pub fn deleted(change: &ChangeRecord) -> Self {
        Self {
            id: change.id,
            tenant: String::new(),
            acl_id: 0,
            node_type: TYPE_DELETED.to_string(),
            aspects: BTreeSet::new(),
            properties: BTreeMap::new(),
            parent_assocs: Vec::new(),
            ancestors: Vec::new(),
            paths: Vec::new(),
            parent_assoc_crc: 0,
            txn_id: change.txn_id,
            owner: None,
        }
    }

    /// Index control: absent means indexed.
    pub fn is_indexed(&self) -> bool {
        self.bool_property(PROP_IS_INDEXED).unwrap_or(true)
    }

    /// Content index control: absent means content is extracted.
    pub fn is_content_indexed(&self) -> bool {
        self.bool_property(PROP_IS_CONTENT_INDEXED).unwrap_or(true)
    }

    pub fn locale(&self) -> Option<&str> {
        self.properties.get(PROP_LOCALE).and_then(|v| v.as_text())
    }

    pub fn primary_parent(&self) -> Option<&ParentAssoc> {
        self.parent_assocs.iter().find(|assoc| assoc.is_primary)
    }

    fn bool_property(&self, name: &str) -> Option<bool> {
        self.properties.get(name).and_then(|v| v.as_bool())
    }
}

/// ACL readers and denials for one ACL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclReaders {
    pub acl_id: i64,
    pub change_set_id: i64,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub readers: BTreeSet<String>,
    #[serde(default)]
    pub denied: BTreeSet<String>,
    /// Types the repository reported for principals whose name alone does
    /// not say what they are.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authority_types: BTreeMap<String, AuthorityType>,
}

impl AclReaders {
    /// Reported type of `authority`, else the type implied by its name.
    pub fn authority_type(&self, authority: &str) -> AuthorityType {
        self.authority_types
            .get(authority)
            .copied()
            .unwrap_or_else(|| AuthorityType::of(authority))
    }
}

/// Kind of authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorityType {
    Admin,
    Everyone,
    Owner,
    Guest,
    Group,
    Role,
    User,
}

impl AuthorityType {
    /// Type implied by the authority name.
    pub fn of(authority: &str) -> Self {
        if authority == "GROUP_EVERYONE" {
            AuthorityType::Everyone
        } else if authority.starts_with("GROUP_") {
            AuthorityType::Group
        } else if authority.starts_with("ROLE_") {
            if authority == "ROLE_OWNER" {
                AuthorityType::Owner
            } else {
                AuthorityType::Role
            }
        } else if authority.eq_ignore_ascii_case("guest") {
            AuthorityType::Guest
        } else if authority.eq_ignore_ascii_case("admin") {
            AuthorityType::Admin
        } else {
            AuthorityType::User
        }
    }
}

/// Qualify group/everyone/guest authorities with a non-default tenant.
///
/// The same rule must be applied when building permission queries.
pub fn qualify_authority(authority: &str, tenant: &str) -> String {
    qualify_authority_as(authority, AuthorityType::of(authority), tenant)
}

/// [`qualify_authority`] for an authority of a known type.
pub fn qualify_authority_as(authority: &str, kind: AuthorityType, tenant: &str) -> String {
    match kind {
        AuthorityType::Group | AuthorityType::Everyone | AuthorityType::Guest
            if !tenant.is_empty() =>
        {
            format!("{}@{}", authority, tenant)
        }
        _ => authority.to_string(),
    }
}

/// Whether a document's extracted content reflects the current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FtsStatus {
    New,
    Dirty,
    Clean,
}

impl FtsStatus {
    /// Combine the status of two content properties; the least clean wins.
    pub fn merge(self, other: FtsStatus) -> FtsStatus {
        use FtsStatus::*;
        match (self, other) {
            (New, _) | (_, New) => New,
            (Dirty, _) | (_, Dirty) => Dirty,
            (Clean, Clean) => Clean,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FtsStatus::New => "New",
            FtsStatus::Dirty => "Dirty",
            FtsStatus::Clean => "Clean",
        }
    }
}

impl fmt::Display for FtsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FtsStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(FtsStatus::New),
            "Dirty" => Ok(FtsStatus::Dirty),
            "Clean" => Ok(FtsStatus::Clean),
            other => Err(CoreError::InvalidValue {
                property: "FTSSTATUS".to_string(),
                message: format!("unknown status {other:?}"),
            }),
        }
    }
}

/// Outcome of a text extraction on the repository side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentStatus {
    Ok,
    NoTransform,
    NoContent,
    TransformFailed,
    GeneralFailure,
    Unmodified,
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentStatus::Ok => "OK",
            ContentStatus::NoTransform => "NO_TRANSFORM",
            ContentStatus::NoContent => "NO_CONTENT",
            ContentStatus::TransformFailed => "TRANSFORM_FAILED",
            ContentStatus::GeneralFailure => "GENERAL_FAILURE",
            ContentStatus::Unmodified => "UNMODIFIED",
        };
        f.write_str(s)
    }
}

/// Extracted text for one content property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub status: ContentStatus,
    #[serde(default)]
    pub exception_text: Option<String>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub content: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify_group_with_tenant() {
        assert_eq!(
            qualify_authority("GROUP_alice", "example.com"),
            "GROUP_alice@example.com"
        );
        assert_eq!(
            qualify_authority("GROUP_EVERYONE", "example.com"),
            "GROUP_EVERYONE@example.com"
        );
        assert_eq!(qualify_authority("guest", "example.com"), "guest@example.com");
    }

    #[test]
    fn test_qualify_default_tenant_unchanged() {
        assert_eq!(qualify_authority("GROUP_alice", ""), "GROUP_alice");
    }

    #[test]
    fn test_users_never_qualified() {
        assert_eq!(qualify_authority("alice", "example.com"), "alice");
        assert_eq!(qualify_authority("ROLE_OWNER", "example.com"), "ROLE_OWNER");
    }

    #[test]
    fn test_reported_authority_type_wins() {
        let json = r#"{
            "acl_id": 3,
            "change_set_id": 1,
            "readers": ["alice", "GROUP_sales"],
            "authority_types": {"alice": "GROUP"}
        }"#;
        let acl: AclReaders = serde_json::from_str(json).unwrap();

        assert_eq!(acl.authority_type("alice"), AuthorityType::Group);
        assert_eq!(acl.authority_type("GROUP_sales"), AuthorityType::Group);
        assert_eq!(acl.authority_type("bob"), AuthorityType::User);
        assert_eq!(
            qualify_authority_as("alice", acl.authority_type("alice"), "example.com"),
            "alice@example.com"
        );
    }

    #[test]
    fn test_index_control_defaults() {
        let change = ChangeRecord::new(7, NodeStatus::Deleted, 3);
        let mut metadata = NodeMetadata::deleted(&change);
        assert!(metadata.is_indexed());
        assert!(metadata.is_content_indexed());

        metadata.properties.insert(
            PROP_IS_INDEXED.to_string(),
            PropertyValue::Text("FALSE".to_string()),
        );
        assert!(!metadata.is_indexed());
    }

    #[test]
    fn test_fts_merge() {
        assert_eq!(FtsStatus::Clean.merge(FtsStatus::Dirty), FtsStatus::Dirty);
        assert_eq!(FtsStatus::Dirty.merge(FtsStatus::New), FtsStatus::New);
        assert_eq!(FtsStatus::Clean.merge(FtsStatus::Clean), FtsStatus::Clean);
    }

    #[test]
    fn test_fts_status_parse() {
        assert_eq!("Dirty".parse::<FtsStatus>().unwrap(), FtsStatus::Dirty);
        assert!("dirty".parse::<FtsStatus>().is_err());
    }

    #[test]
    fn test_content_refs_descend_lists() {
        let content = ContentRef {
            content_id: 1,
            mimetype: "text/plain".to_string(),
            encoding: "UTF-8".to_string(),
            locale: "en".to_string(),
            length: 3,
        };
        let value = PropertyValue::List(vec![
            PropertyValue::Text("x".to_string()),
            PropertyValue::Content(content.clone()),
        ]);
        assert_eq!(value.content_refs(), vec![&content]);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&NodeStatus::Deleted).unwrap();
        assert_eq!(json, "\"DELETED\"");
    }
}
