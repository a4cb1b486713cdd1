//! Integration tests for durable synchronization across restarts.

use std::sync::Arc;

use indexsync_core::{
    now_ms, ChangeRecord, ModelHandle, NodeMetadata, NodeStatus, PropertyValue, SyncConfig,
    Transaction,
};
use indexsync_indexer::document::FIELD_DBID;
use indexsync_indexer::{
    FileContentStore, IndexEngine, InMemoryRepository, InformationServer, MemoryIndex,
    MetadataTracker, Query, Tracker,
};
use tempfile::tempdir;

/// Helper to create a test config
fn test_config(temp_dir: &std::path::Path) -> SyncConfig {
    SyncConfig {
        data_dir: temp_dir.to_path_buf(),
        pid_file: temp_dir.join("test.pid"),
        log_level: "debug".to_string(),
        ..Default::default()
    }
}

fn document(id: i64, txn_id: i64) -> NodeMetadata {
    let mut md = NodeMetadata::deleted(&ChangeRecord::new(id, NodeStatus::Updated, txn_id));
    md.node_type = "cm:content".to_string();
    md.acl_id = 1;
    md.properties.insert(
        "cm:name".to_string(),
        PropertyValue::Text(format!("doc-{}.txt", id)),
    );
    md
}

/// Open the index on disk and wire a server over it.
fn open_server(
    config: &SyncConfig,
    repository: Arc<InMemoryRepository>,
) -> (Arc<MemoryIndex>, Arc<InformationServer>) {
    let index = Arc::new(MemoryIndex::open(config.index_path()).unwrap());
    let server = Arc::new(InformationServer::new(
        config,
        index.clone(),
        Arc::new(FileContentStore::new(config.content_store_dir())),
        repository,
        ModelHandle::default(),
    ));
    (index, server)
}

/// Cursor and documents survive a restart; the next cycle resumes after the cursor.
#[tokio::test]
async fn test_restart_resumes_from_persisted_cursor() {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    config.ensure_dirs().unwrap();

    let t = now_ms() - 60_000;
    let repository = Arc::new(InMemoryRepository::default());
    repository.put_node(document(1, 10));
    repository.commit_transaction(
        Transaction::new(10, t),
        vec![ChangeRecord::new(1, NodeStatus::Updated, 10)],
    );

    {
        let (_, server) = open_server(&config, repository.clone());
        let report = MetadataTracker::new(server.clone(), config.tracker.clone())
            .run_cycle()
            .await
            .unwrap();
        assert_eq!(report.transactions, 1);
    }

    // Restart
    let (index, server) = open_server(&config, repository.clone());
    let state = server.tracker_initial_state().unwrap();
    assert_eq!(state.last_indexed_tx_id, 10);
    assert_eq!(state.last_indexed_tx_commit_time, t);
    assert_eq!(index.search(&Query::term(FIELD_DBID, 1)).unwrap().len(), 1);

    repository.put_node(document(2, 11));
    repository.commit_transaction(
        Transaction::new(11, t + 1_000),
        vec![ChangeRecord::new(2, NodeStatus::Updated, 11)],
    );

    let report = MetadataTracker::new(server.clone(), config.tracker.clone())
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.transactions, 1);
    assert_eq!(report.nodes_indexed, 1);
    assert_eq!(server.tracker_initial_state().unwrap().last_indexed_tx_id, 11);
}

/// Staged writes that were never committed are gone after a restart.
#[tokio::test]
async fn test_uncommitted_writes_do_not_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    config.ensure_dirs().unwrap();
    let repository = Arc::new(InMemoryRepository::default());

    {
        let (_, server) = open_server(&config, repository.clone());
        let session = server.session();
        server
            .index_transaction(&session, &Transaction::new(5, now_ms() - 60_000), true)
            .unwrap();
        assert_eq!(session.len(), 2);
        // Dropped without commit
    }

    let (index, server) = open_server(&config, repository);
    assert!(index.is_empty());
    assert_eq!(server.tracker_initial_state().unwrap().last_indexed_tx_id, 0);
}
