//! ACL documents.

use crate::document::*;
use crate::engine::{WriteOp, WriteSession};
use crate::state::TrackerStateStore;
use crate::IndexerError;
use indexsync_core::{qualify_authority_as, tenant_id, AclChangeSet, AclReaders};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct AclIndexer {
    state: Arc<TrackerStateStore>,
}

impl AclIndexer {
    pub fn new(state: Arc<TrackerStateStore>) -> Self {
        Self { state }
    }

    /// Stage one document per ACL. Returns the time spent.
    pub fn index_acl(
        &self,
        session: &WriteSession,
        acls: &[AclReaders],
        overwrite: bool,
    ) -> Result<Duration, IndexerError> {
        let start = Instant::now();
        let ops = acls
            .iter()
            .map(|acl| WriteOp::Add {
                doc: acl_document(acl),
                overwrite,
            })
            .collect();
        session.stage(ops);

        let elapsed = start.elapsed();
        debug!(acls = acls.len(), elapsed_us = elapsed.as_micros() as u64, "Indexed ACLs");
        Ok(elapsed)
    }

    pub fn index_acl_transaction(
        &self,
        session: &WriteSession,
        change_set: &AclChangeSet,
        overwrite: bool,
    ) -> Result<(), IndexerError> {
        self.state.index_acl_transaction(session, change_set, overwrite)
    }
}

fn acl_document(acl: &AclReaders) -> Document {
    let mut doc = Document::with_type(acl_doc_id(&acl.tenant, acl.acl_id), DocType::Acl);
    doc.set(FIELD_ACLID, acl.acl_id);
    doc.set(FIELD_INACLTXID, acl.change_set_id);
    let qualify =
        |authority: &str| qualify_authority_as(authority, acl.authority_type(authority), &acl.tenant);
    for reader in &acl.readers {
        doc.add(FIELD_READER, qualify(reader));
    }
    for denied in &acl.denied {
        doc.add(FIELD_DENIED, qualify(denied));
    }
    doc.set(FIELD_TENANT, tenant_id(&acl.tenant));
    doc
}
