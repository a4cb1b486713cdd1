//! Read-only consistency checks of the index against repository ids.
//!
//! Reports are snapshots of committed state and may be stale by the time
//! they are read. Nothing here writes to the index.

use crate::content::docs_with_unclean_content;
use crate::document::*;
use crate::engine::{Hit, IndexEngine};
use crate::query::Query;
use crate::IndexerError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Index documents of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub node_id: i64,
    /// Position of the node document
    pub leaf_doc: Option<u64>,
    pub leaf_txn: Option<i64>,
    /// Position of the unindexed placeholder
    pub aux_doc: Option<u64>,
    pub aux_txn: Option<i64>,
    pub error_doc: Option<u64>,
    /// Whether the transaction that last indexed the node has its marker
    pub txn_marker_present: bool,
    /// Node documents beyond the first
    pub duplicate_docs: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AclReport {
    pub acl_id: i64,
    pub acl_doc: Option<u64>,
    pub acl_change_set: Option<i64>,
    pub change_set_marker_present: bool,
}

/// Repository ids of one log between `min` and `max` inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdRange {
    pub min: i64,
    pub max: i64,
    pub ids_in_db: BTreeSet<i64>,
}

impl IdRange {
    pub fn new(min: i64, max: i64, ids_in_db: impl IntoIterator<Item = i64>) -> Self {
        Self {
            min,
            max,
            ids_in_db: ids_in_db.into_iter().collect(),
        }
    }

    fn contains(&self, id: i64) -> bool {
        (self.min..=self.max).contains(&id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexHealthReport {
    pub db_transaction_count: usize,
    pub missing_tx_from_index: BTreeSet<i64>,
    pub duplicated_tx_in_index: BTreeSet<i64>,
    pub tx_in_index_not_in_db: BTreeSet<i64>,
    pub db_acl_change_set_count: usize,
    pub missing_acl_tx_from_index: BTreeSet<i64>,
    pub duplicated_acl_tx_in_index: BTreeSet<i64>,
    pub acl_tx_in_index_not_in_db: BTreeSet<i64>,
    pub error_doc_ids: BTreeSet<i64>,
    pub unclean_content_docs: BTreeSet<i64>,
    pub unique_node_ids: usize,
    pub duplicated_leaf_in_index: BTreeSet<i64>,
}

impl IndexHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.missing_tx_from_index.is_empty()
            && self.duplicated_tx_in_index.is_empty()
            && self.tx_in_index_not_in_db.is_empty()
            && self.missing_acl_tx_from_index.is_empty()
            && self.duplicated_acl_tx_in_index.is_empty()
            && self.acl_tx_in_index_not_in_db.is_empty()
            && self.error_doc_ids.is_empty()
            && self.duplicated_leaf_in_index.is_empty()
    }
}

pub struct HealthChecker {
    engine: Arc<dyn IndexEngine>,
}

impl HealthChecker {
    pub fn new(engine: Arc<dyn IndexEngine>) -> Self {
        Self { engine }
    }

    pub fn check_node_common(&self, node_id: i64) -> Result<NodeReport, IndexerError> {
        let hits = self.engine.search(&Query::term(FIELD_DBID, node_id))?;
        let mut report = NodeReport {
            node_id,
            ..Default::default()
        };

        let mut leaves: usize = 0;
        for hit in &hits {
            if hit.doc.is_type(DocType::Node) {
                leaves += 1;
                if report.leaf_doc.is_none() {
                    report.leaf_doc = Some(hit.position);
                    report.leaf_txn = hit.doc.long(FIELD_INTXID);
                }
            } else if hit.doc.is_type(DocType::UnindexedNode) {
                report.aux_doc.get_or_insert(hit.position);
                report.aux_txn = report.aux_txn.or(hit.doc.long(FIELD_INTXID));
            } else if hit.doc.is_type(DocType::ErrorNode) {
                report.error_doc.get_or_insert(hit.position);
            }
        }
        report.duplicate_docs = leaves.saturating_sub(1);

        if let Some(txn_id) = report.leaf_txn.or(report.aux_txn) {
            report.txn_marker_present = self.engine.exists(&Query::term(FIELD_TXID, txn_id))?;
        }
        Ok(report)
    }

    pub fn check_acl_in_index(&self, acl_id: i64) -> Result<AclReport, IndexerError> {
        let acl_doc = self
            .engine
            .search(&Query::term(FIELD_ACLID, acl_id))?
            .into_iter()
            .find(|hit| hit.doc.is_type(DocType::Acl));

        let mut report = AclReport {
            acl_id,
            ..Default::default()
        };
        if let Some(hit) = acl_doc {
            report.acl_doc = Some(hit.position);
            report.acl_change_set = hit.doc.long(FIELD_INACLTXID);
        }
        if let Some(change_set_id) = report.acl_change_set {
            report.change_set_marker_present = self
                .engine
                .exists(&Query::term(FIELD_ACLTXID, change_set_id))?;
        }
        Ok(report)
    }

    /// Compare transaction and change set markers against the ids the
    /// repository holds in each range.
    pub fn check_index_transactions(
        &self,
        transactions: &IdRange,
        change_sets: &IdRange,
    ) -> Result<IndexHealthReport, IndexerError> {
        let mut report = IndexHealthReport {
            db_transaction_count: transactions.ids_in_db.len(),
            db_acl_change_set_count: change_sets.ids_in_db.len(),
            ..Default::default()
        };

        let tx_markers = self.marker_counts(FIELD_TXID, transactions)?;
        compare_markers(
            transactions,
            &tx_markers,
            &mut report.missing_tx_from_index,
            &mut report.duplicated_tx_in_index,
            &mut report.tx_in_index_not_in_db,
        );

        let acl_markers = self.marker_counts(FIELD_ACLTXID, change_sets)?;
        compare_markers(
            change_sets,
            &acl_markers,
            &mut report.missing_acl_tx_from_index,
            &mut report.duplicated_acl_tx_in_index,
            &mut report.acl_tx_in_index_not_in_db,
        );

        report.error_doc_ids = self.error_doc_ids()?;
        report.unclean_content_docs = docs_with_unclean_content(self.engine.as_ref())?
            .into_iter()
            .map(|doc| doc.node_id)
            .collect();

        let mut leaves: BTreeMap<i64, usize> = BTreeMap::new();
        for hit in self.engine.search(&Query::exists(FIELD_DBID))? {
            if hit.doc.is_type(DocType::Node) {
                if let Some(id) = hit.doc.long(FIELD_DBID) {
                    *leaves.entry(id).or_default() += 1;
                }
            }
        }
        report.unique_node_ids = leaves.len();
        report.duplicated_leaf_in_index = leaves
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, _)| id)
            .collect();

        Ok(report)
    }

    /// Node ids that have an error marker.
    pub fn error_doc_ids(&self) -> Result<BTreeSet<i64>, IndexerError> {
        Ok(self
            .engine
            .search(&Query::term(FIELD_DOC_TYPE, DocType::ErrorNode.as_str()))?
            .iter()
            .filter_map(|hit| hit.doc.long(FIELD_DBID))
            .collect())
    }

    /// Number of markers recording `txn_id` at `commit_time`.
    pub fn doc_set_size(&self, txn_id: i64, commit_time: i64) -> Result<usize, IndexerError> {
        self.engine.count(
            &Query::term(FIELD_TXID, txn_id).and(Query::term(FIELD_TXCOMMITTIME, commit_time)),
        )
    }

    pub fn is_in_index(&self, doc_id: &str) -> Result<bool, IndexerError> {
        Ok(self.engine.get(doc_id)?.is_some())
    }

    fn marker_counts(&self, field: &str, range: &IdRange) -> Result<BTreeMap<i64, usize>, IndexerError> {
        let hits: Vec<Hit> = self.engine.search(&Query::exists(field))?;
        let mut counts = BTreeMap::new();
        for id in hits.iter().filter_map(|hit| hit.doc.long(field)) {
            if range.contains(id) {
                *counts.entry(id).or_default() += 1;
            }
        }
        Ok(counts)
    }
}

fn compare_markers(
    range: &IdRange,
    markers: &BTreeMap<i64, usize>,
    missing: &mut BTreeSet<i64>,
    duplicated: &mut BTreeSet<i64>,
    not_in_db: &mut BTreeSet<i64>,
) {
    for id in range.ids_in_db.iter().filter(|id| range.contains(**id)) {
        if !markers.contains_key(id) {
            missing.insert(*id);
        }
    }
    for (id, count) in markers {
        if *count > 1 {
            duplicated.insert(*id);
        }
        if !range.ids_in_db.contains(id) {
            not_in_db.insert(*id);
        }
    }
}
