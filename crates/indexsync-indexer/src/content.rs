//! Content cache integration.
//!
//! Metadata changes rebuild a node document cheaply by copying the
//! extracted text from the previously cached document. Extraction itself
//! happens later, in [`ContentResolver::refresh_cached_document`], driven
//! by the content tracker.

use crate::document::*;
use crate::engine::IndexEngine;
use crate::query::Query;
use crate::repository::RepositoryClient;
use crate::storage::ContentStore;
use crate::IndexerError;
use indexsync_core::{
    ContentFieldType, ContentRef, DataModel, FtsStatus, ModelHandle, NodeMetadata, TrackerStats,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A document whose content still needs extracting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UncleanDocument {
    pub tenant: String,
    pub node_id: i64,
    /// Transaction that last indexed the node
    pub txn_id: i64,
}

pub struct ContentResolver {
    store: Arc<dyn ContentStore>,
    repository: Arc<dyn RepositoryClient>,
    model: ModelHandle,
    transform_content: bool,
    default_locale: String,
    stats: Arc<TrackerStats>,
}

impl ContentResolver {
    pub fn new(
        store: Arc<dyn ContentStore>,
        repository: Arc<dyn RepositoryClient>,
        model: ModelHandle,
        transform_content: bool,
        default_locale: String,
        stats: Arc<TrackerStats>,
    ) -> Self {
        Self {
            store,
            repository,
            model,
            transform_content,
            default_locale,
            stats,
        }
    }

    pub async fn cached_document(
        &self,
        tenant: &str,
        node_id: i64,
    ) -> Result<Option<Document>, IndexerError> {
        match self.store.read(tenant, node_id).await? {
            Some(bytes) => Ok(Some(Document::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn store_document(
        &self,
        tenant: &str,
        node_id: i64,
        doc: &Document,
    ) -> Result<(), IndexerError> {
        self.store.write(tenant, node_id, &doc.to_bytes()?).await
    }

    pub async fn remove_document(&self, tenant: &str, node_id: i64) -> Result<bool, IndexerError> {
        self.store.delete(tenant, node_id).await
    }

    /// Add content fields for every content property of `metadata` to a
    /// freshly built document and record its FTS status.
    ///
    /// Returns `None` when the node has no content properties.
    pub fn resolve_content(
        &self,
        model: &DataModel,
        metadata: &NodeMetadata,
        cached: Option<&Document>,
        doc: &mut Document,
    ) -> Option<FtsStatus> {
        let mut status: Option<FtsStatus> = None;

        for (property, value) in &metadata.properties {
            for content in value.content_refs() {
                let locale = if content.locale.is_empty() {
                    metadata.locale().unwrap_or(self.default_locale.as_str())
                } else {
                    content.locale.as_str()
                };
                add_content_metadata(model, doc, property, content, locale);

                let property_status = if !self.transform_content {
                    FtsStatus::Clean
                } else {
                    match cached {
                        Some(cached) => copy_cached_content(model, doc, cached, property, content),
                        None => FtsStatus::New,
                    }
                };
                status = Some(match status {
                    Some(current) => current.merge(property_status),
                    None => property_status,
                });
            }
        }

        if let Some(status) = status {
            doc.set(FIELD_FTSSTATUS, status);
        }
        status
    }

    /// Extract text for every content property recorded in the cached
    /// document, mark it clean and store it back. The caller submits the
    /// returned document to the index.
    pub async fn refresh_cached_document(
        &self,
        tenant: &str,
        node_id: i64,
    ) -> Result<Document, IndexerError> {
        let mut doc = self.cached_document(tenant, node_id).await?.ok_or_else(|| {
            IndexerError::MissingCachedDocument {
                tenant: tenant.to_string(),
                node_id,
            }
        })?;
        let model = self.model.snapshot();

        let properties: Vec<(String, String)> = doc
            .field_names()
            .filter_map(|field| {
                DataModel::content_property_of_locale_field(field).map(|property| {
                    let locale = doc.first(field).unwrap_or(self.default_locale.as_str());
                    (property.to_string(), locale.to_string())
                })
            })
            .collect();

        for (property, locale) in properties {
            let start = Instant::now();
            let response = self.repository.get_text_content(node_id, &property).await?;

            let field = |kind| model.content_metadata_field(&property, kind);
            if let Some(name) = field(ContentFieldType::TransformationStatus).first() {
                doc.set(name, response.status);
            }
            if let Some(name) = field(ContentFieldType::TransformationException).first() {
                match &response.exception_text {
                    Some(text) => doc.set(name, text),
                    None => {
                        doc.remove(name);
                    }
                }
            }
            if let Some(name) = field(ContentFieldType::TransformationTime).first() {
                doc.set(name, response.duration_ms);
            }

            let text = response
                .content
                .as_deref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default();
            for instance in model.indexed_fields_for_property(&property).fields {
                if instance.localised {
                    doc.set(&instance.field, localised_value(&locale, &text));
                } else {
                    doc.set(&instance.field, &text);
                }
            }

            self.stats.record_transformation(start.elapsed());
            debug!(
                node_id = node_id,
                property = %property,
                status = %response.status,
                chars = text.len(),
                "Extracted content"
            );
        }

        doc.set(FIELD_FTSSTATUS, FtsStatus::Clean);
        self.store_document(tenant, node_id, &doc).await?;
        Ok(doc)
    }
}

/// Node documents whose FTS status is `New` or `Dirty`.
pub fn docs_with_unclean_content(
    engine: &dyn IndexEngine,
) -> Result<Vec<UncleanDocument>, IndexerError> {
    let query = Query::any_of(
        FIELD_FTSSTATUS,
        [FtsStatus::New.as_str(), FtsStatus::Dirty.as_str()],
    );
    Ok(engine
        .search(&query)?
        .into_iter()
        .filter_map(|hit| {
            let node_id = hit.doc.long(FIELD_DBID)?;
            let tenant = hit.doc.first(FIELD_TENANT)?.to_string();
            let txn_id = hit.doc.long(FIELD_INTXID).unwrap_or(0);
            Some(UncleanDocument {
                tenant,
                node_id,
                txn_id,
            })
        })
        .collect())
}

fn add_content_metadata(
    model: &DataModel,
    doc: &mut Document,
    property: &str,
    content: &ContentRef,
    locale: &str,
) {
    let fields = [
        (ContentFieldType::DocId, content.content_id.to_string()),
        (ContentFieldType::Size, content.length.to_string()),
        (ContentFieldType::Locale, locale.to_string()),
        (ContentFieldType::Mimetype, content.mimetype.clone()),
        (ContentFieldType::Encoding, content.encoding.clone()),
    ];
    for (kind, value) in fields {
        if let Some(name) = model.content_metadata_field(property, kind).first() {
            doc.add(name, value);
        }
    }
}

/// Copy extracted text and transformation metadata from the cached
/// document, whether or not it is current.
fn copy_cached_content(
    model: &DataModel,
    doc: &mut Document,
    cached: &Document,
    property: &str,
    content: &ContentRef,
) -> FtsStatus {
    for instance in model.indexed_fields_for_property(property).fields {
        doc.set_all(&instance.field, cached.values(&instance.field).to_vec());
    }
    for kind in [
        ContentFieldType::TransformationStatus,
        ContentFieldType::TransformationException,
        ContentFieldType::TransformationTime,
    ] {
        if let Some(name) = model.content_metadata_field(property, kind).first() {
            doc.set_all(name, cached.values(name).to_vec());
        }
    }

    let cached_content_id = model
        .content_metadata_field(property, ContentFieldType::DocId)
        .first()
        .and_then(|name| cached.long(name));
    if cached_content_id == Some(content.content_id) {
        FtsStatus::Clean
    } else {
        FtsStatus::Dirty
    }
}
