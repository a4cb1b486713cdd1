mod common;

use common::*;
use indexsync_core::{AclChangeSet, AclReaders, Transaction};
use indexsync_indexer::{AclTracker, IdRange, MetadataTracker, Tracker};
use std::collections::BTreeSet;

async fn synced(h: &Harness) {
    let t = recent(0);
    let repo = &h.repository.inner;
    for id in 1..=3 {
        repo.put_node(document(id, 10));
    }
    repo.commit_transaction(
        Transaction::new(10, t),
        vec![updated(1, 10), updated(2, 10), updated(3, 10)],
    );
    repo.commit_transaction(Transaction::new(11, t + 100), vec![]);
    repo.commit_acl_change_set(
        AclChangeSet::new(3, t),
        vec![AclReaders {
            acl_id: 1,
            change_set_id: 3,
            tenant: String::new(),
            readers: BTreeSet::from(["GROUP_EVERYONE".to_string()]),
            denied: BTreeSet::new(),
            authority_types: Default::default(),
        }],
    );

    MetadataTracker::new(h.server.clone(), h.config.tracker.clone())
        .run_cycle()
        .await
        .unwrap();
    AclTracker::new(h.server.clone(), h.config.tracker.clone())
        .run_cycle()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_synced_index_is_healthy() {
    let h = harness();
    synced(&h).await;

    let report = h
        .server
        .check_index_transactions(&IdRange::new(10, 11, [10, 11]), &IdRange::new(3, 3, [3]))
        .unwrap();

    assert!(report.is_healthy(), "{:?}", report);
    assert_eq!(report.db_transaction_count, 2);
    assert_eq!(report.db_acl_change_set_count, 1);
    assert_eq!(report.unique_node_ids, 3);
    assert!(report.unclean_content_docs.is_empty());

    let node = h.server.check_node_common(2).unwrap();
    assert!(node.leaf_doc.is_some());
    assert_eq!(node.leaf_txn, Some(10));
    assert!(node.txn_marker_present);

    let acl = h.server.check_acl_in_index(1).unwrap();
    assert!(acl.change_set_marker_present);
}

#[tokio::test]
async fn test_health_reports_without_repairing() {
    let h = harness();
    synced(&h).await;

    let session = h.server.session();
    h.server.delete_by_transaction_id(&session, 11);
    h.server.delete_by_node_id(&session, 3);
    h.server.commit(session).unwrap();

    let report = h
        .server
        .check_index_transactions(
            &IdRange::new(10, 12, [10, 11, 12]),
            &IdRange::new(1, 3, [3]),
        )
        .unwrap();

    assert_eq!(report.missing_tx_from_index, BTreeSet::from([11, 12]));
    assert!(report.tx_in_index_not_in_db.is_empty());
    assert_eq!(report.unique_node_ids, 2);
    assert!(!report.is_healthy());

    // Reporting never writes
    let again = h
        .server
        .check_index_transactions(
            &IdRange::new(10, 12, [10, 11, 12]),
            &IdRange::new(1, 3, [3]),
        )
        .unwrap();
    assert_eq!(report, again);
}

#[tokio::test]
async fn test_acl_maintenance_deletes() {
    let h = harness();
    synced(&h).await;

    let session = h.server.session();
    h.server.delete_by_acl_change_set_id(&session, 3);
    h.server.commit(session).unwrap();

    let acl = h.server.check_acl_in_index(1).unwrap();
    assert!(acl.acl_doc.is_none());
    // Node documents sharing the ACL id are untouched
    assert!(h.server.check_node_common(1).unwrap().leaf_doc.is_some());

    let report = h
        .server
        .check_index_transactions(&IdRange::new(10, 11, [10, 11]), &IdRange::new(3, 3, [3]))
        .unwrap();
    assert_eq!(report.missing_acl_tx_from_index, BTreeSet::from([3]));
}

#[tokio::test]
async fn test_error_nodes_surface_in_report() {
    let h = harness();
    h.repository.poison(2);
    synced(&h).await;

    let report = h
        .server
        .check_index_transactions(&IdRange::new(10, 11, [10, 11]), &IdRange::default())
        .unwrap();
    assert_eq!(report.error_doc_ids, BTreeSet::from([2]));
    assert_eq!(report.unique_node_ids, 2);

    let node = h.server.check_node_common(2).unwrap();
    assert!(node.error_doc.is_some());
    assert!(node.leaf_doc.is_none());
}
