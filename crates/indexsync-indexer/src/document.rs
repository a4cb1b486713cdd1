//! Index documents.
//!
//! A document is an id plus a multimap of field name to string values.
//! Numeric fields are stored in decimal so term queries compare them
//! exactly. The same type is what the content cache persists.

use crate::IndexerError;
use indexsync_core::tenant_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FIELD_DOC_TYPE: &str = "DOC_TYPE";
pub const FIELD_DBID: &str = "DBID";
pub const FIELD_INTXID: &str = "INTXID";
pub const FIELD_ACLID: &str = "ACLID";
pub const FIELD_TYPE: &str = "TYPE";
pub const FIELD_ASPECT: &str = "ASPECT";
pub const FIELD_ISNODE: &str = "ISNODE";
pub const FIELD_TENANT: &str = "TENANT";
pub const FIELD_PATH: &str = "PATH";
pub const FIELD_OWNER: &str = "OWNER";
pub const FIELD_PARENT_ASSOC_CRC: &str = "PARENT_ASSOC_CRC";
pub const FIELD_PARENT: &str = "PARENT";
pub const FIELD_PRIMARYPARENT: &str = "PRIMARYPARENT";
pub const FIELD_PRIMARYASSOCTYPEQNAME: &str = "PRIMARYASSOCTYPEQNAME";
pub const FIELD_PRIMARYASSOCQNAME: &str = "PRIMARYASSOCQNAME";
pub const FIELD_ASSOCTYPEQNAME: &str = "ASSOCTYPEQNAME";
pub const FIELD_QNAME: &str = "QNAME";
pub const FIELD_ANCESTOR: &str = "ANCESTOR";
pub const FIELD_FTSSTATUS: &str = "FTSSTATUS";

pub const FIELD_TXID: &str = "TXID";
pub const FIELD_TXCOMMITTIME: &str = "TXCOMMITTIME";
pub const FIELD_ACLTXID: &str = "ACLTXID";
pub const FIELD_INACLTXID: &str = "INACLTXID";
pub const FIELD_ACLTXCOMMITTIME: &str = "ACLTXCOMMITTIME";
pub const FIELD_READER: &str = "READER";
pub const FIELD_DENIED: &str = "DENIED";

pub const FIELD_EXCEPTION_MESSAGE: &str = "EXCEPTIONMESSAGE";
pub const FIELD_EXCEPTION_STACK: &str = "EXCEPTIONSTACK";

pub const FIELD_S_TXID: &str = "S_TXID";
pub const FIELD_S_INTXID: &str = "S_INTXID";
pub const FIELD_S_TXCOMMITTIME: &str = "S_TXCOMMITTIME";
pub const FIELD_S_ACLTXID: &str = "S_ACLTXID";
pub const FIELD_S_INACLTXID: &str = "S_INACLTXID";
pub const FIELD_S_ACLTXCOMMITTIME: &str = "S_ACLTXCOMMITTIME";

/// Id of the transaction tracker state marker.
pub const TX_STATE_DOC_ID: &str = "TRACKER!STATE!TX";
/// Id of the ACL tracker state marker.
pub const ACL_STATE_DOC_ID: &str = "TRACKER!STATE!ACLTX";

/// Longest exception stack kept on an error marker.
pub const MAX_EXCEPTION_STACK: usize = 32_765;

/// Kind of document, stored in [`FIELD_DOC_TYPE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Node,
    UnindexedNode,
    ErrorNode,
    Acl,
    Tx,
    AclTx,
    State,
}

impl DocType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Node => "Node",
            DocType::UnindexedNode => "UnindexedNode",
            DocType::ErrorNode => "ErrorNode",
            DocType::Acl => "Acl",
            DocType::Tx => "Tx",
            DocType::AclTx => "AclTx",
            DocType::State => "State",
        }
    }
}

pub fn node_doc_id(tenant: &str, acl_id: i64, node_id: i64) -> String {
    format!("{}!{:x}!{:x}", tenant_id(tenant), acl_id, node_id)
}

pub fn acl_doc_id(tenant: &str, acl_id: i64) -> String {
    format!("{}!{:x}!ACL", tenant_id(tenant), acl_id)
}

pub fn tx_doc_id(txn_id: i64) -> String {
    format!("TX-{}", txn_id)
}

pub fn acl_tx_doc_id(change_set_id: i64) -> String {
    format!("ACLTX-{}", change_set_id)
}

pub fn error_doc_id(node_id: i64) -> String {
    format!("ERROR-{}", node_id)
}

/// Value stored in a localised field: `\0<locale>\0<text>`.
pub fn localised_value(locale: &str, text: &str) -> String {
    format!("\u{0}{}\u{0}{}", locale, text)
}

/// An index document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    fields: BTreeMap<String, Vec<String>>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_type(id: impl Into<String>, doc_type: DocType) -> Self {
        let mut doc = Self::new(id);
        doc.set(FIELD_DOC_TYPE, doc_type.as_str());
        doc
    }

    /// Append a value to a field.
    pub fn add(&mut self, field: &str, value: impl ToString) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// Replace all values of a field with one value.
    pub fn set(&mut self, field: &str, value: impl ToString) {
        self.fields
            .insert(field.to_string(), vec![value.to_string()]);
    }

    /// Replace all values of a field.
    pub fn set_all(&mut self, field: &str, values: Vec<String>) {
        if values.is_empty() {
            self.fields.remove(field);
        } else {
            self.fields.insert(field.to_string(), values);
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Vec<String>> {
        self.fields.remove(field)
    }

    pub fn values(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, field: &str) -> Option<&str> {
        self.values(field).first().map(String::as_str)
    }

    pub fn long(&self, field: &str) -> Option<i64> {
        self.first(field).and_then(|v| v.parse().ok())
    }

    pub fn contains(&self, field: &str, value: &str) -> bool {
        self.values(field).iter().any(|v| v == value)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_type(&self, doc_type: DocType) -> bool {
        self.contains(FIELD_DOC_TYPE, doc_type.as_str())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexerError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexerError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
