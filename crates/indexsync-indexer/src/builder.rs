//! Builds index documents from repository metadata.

use crate::document::*;
use crate::IndexerError;
use indexsync_core::{tenant_id, ChangeRecord, DataModel, NodeMetadata, PropertyValue};
use std::error::Error as StdError;

/// Document builder bound to one data model snapshot.
pub struct DocumentBuilder<'a> {
    model: &'a DataModel,
    default_locale: &'a str,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(model: &'a DataModel, default_locale: &'a str) -> Self {
        Self {
            model,
            default_locale,
        }
    }

    /// Full node document, without content fields.
    pub fn node_document(&self, metadata: &NodeMetadata) -> Document {
        let mut doc = Document::with_type(
            node_doc_id(&metadata.tenant, metadata.acl_id, metadata.id),
            DocType::Node,
        );
        doc.set(FIELD_DBID, metadata.id);
        doc.set(FIELD_INTXID, metadata.txn_id);
        doc.set(FIELD_ACLID, metadata.acl_id);
        doc.set(FIELD_TYPE, &metadata.node_type);
        for aspect in &metadata.aspects {
            doc.add(FIELD_ASPECT, aspect);
        }
        doc.set(FIELD_ISNODE, "T");
        doc.set(FIELD_TENANT, tenant_id(&metadata.tenant));

        for path in &metadata.paths {
            doc.add(FIELD_PATH, path);
        }
        if let Some(owner) = &metadata.owner {
            doc.set(FIELD_OWNER, owner);
        }
        doc.set(FIELD_PARENT_ASSOC_CRC, metadata.parent_assoc_crc);

        if !metadata.parent_assocs.is_empty() {
            let mut qnames = Vec::with_capacity(metadata.parent_assocs.len());
            let mut assoc_types = Vec::with_capacity(metadata.parent_assocs.len());
            for assoc in &metadata.parent_assocs {
                qnames.push(assoc.assoc_name.as_str());
                assoc_types.push(assoc.assoc_type.as_str());
                doc.add(FIELD_PARENT, assoc.parent_id);
                if assoc.is_primary {
                    doc.set(FIELD_PRIMARYPARENT, assoc.parent_id);
                    doc.set(FIELD_PRIMARYASSOCTYPEQNAME, &assoc.assoc_type);
                    doc.set(FIELD_PRIMARYASSOCQNAME, &assoc.assoc_name);
                }
            }
            doc.set(FIELD_ASSOCTYPEQNAME, assoc_types.join(";/"));
            doc.set(FIELD_QNAME, qnames.join(";/"));
        }

        for ancestor in &metadata.ancestors {
            doc.add(FIELD_ANCESTOR, ancestor);
        }

        let locale = metadata.locale().unwrap_or(self.default_locale);
        for (name, value) in &metadata.properties {
            self.add_property(&mut doc, name, value, locale);
        }

        doc
    }

    /// Placeholder kept for a node excluded from the index, so path
    /// lookups still resolve it.
    pub fn unindexed_document(&self, metadata: &NodeMetadata) -> Document {
        let mut doc = Document::with_type(
            node_doc_id(&metadata.tenant, metadata.acl_id, metadata.id),
            DocType::UnindexedNode,
        );
        doc.set(FIELD_DBID, metadata.id);
        doc.set(FIELD_INTXID, metadata.txn_id);
        doc.set(FIELD_TENANT, tenant_id(&metadata.tenant));
        doc
    }

    fn add_property(&self, doc: &mut Document, name: &str, value: &PropertyValue, locale: &str) {
        match value {
            PropertyValue::Text(text) => {
                for field in self.model.indexed_fields_for_property(name).fields {
                    if field.localised {
                        doc.add(&field.field, localised_value(locale, text));
                    } else {
                        doc.add(&field.field, text);
                    }
                }
            }
            PropertyValue::MlText(values) => {
                for field in self.model.indexed_fields_for_property(name).fields {
                    if !field.localised {
                        for text in values.values() {
                            doc.add(&field.field, text);
                        }
                    } else if field.sort {
                        let joined: Vec<String> = values
                            .iter()
                            .map(|(locale, text)| localised_value(locale, text))
                            .collect();
                        doc.add(&field.field, joined.join("\u{0}"));
                    } else {
                        for (locale, text) in values {
                            doc.add(&field.field, localised_value(locale, text));
                        }
                    }
                }
            }
            // Content is resolved against the content cache
            PropertyValue::Content(_) => {}
            PropertyValue::List(values) => {
                for value in values {
                    self.add_property(doc, name, value, locale);
                }
            }
        }
    }
}

/// Marker recording a node that could not be indexed.
pub fn error_document(change: &ChangeRecord, error: &IndexerError) -> Document {
    let mut doc = Document::with_type(error_doc_id(change.id), DocType::ErrorNode);
    doc.set(FIELD_DBID, change.id);
    doc.set(FIELD_INTXID, change.txn_id);
    doc.set(FIELD_EXCEPTION_MESSAGE, error);
    doc.set(FIELD_EXCEPTION_STACK, error_chain(error));
    doc
}

/// The error and its sources, one per line, cut to [`MAX_EXCEPTION_STACK`] bytes.
fn error_chain(error: &IndexerError) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str("\ncaused by: ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }

    if chain.len() > MAX_EXCEPTION_STACK {
        let mut end = MAX_EXCEPTION_STACK;
        while !chain.is_char_boundary(end) {
            end -= 1;
        }
        chain.truncate(end);
    }
    chain
}
