//! End-to-end behavior of the engine against the in-memory remote.

use std::sync::Arc;

use driftwood_core::{ConflictResolution, Item, OperationKind, DEFAULT_QUERY_NAME};
use driftwood_sync::{
    LocalStore, MemoryRemote, PushStatus, RemoteError, SqliteLocalStore, SyncConfig, SyncEngine,
};

const TABLE: &str = "item";

async fn setup() -> (Arc<SqliteLocalStore>, Arc<MemoryRemote>, Arc<SyncEngine>) {
    let store = Arc::new(SqliteLocalStore::in_memory().await.unwrap());
    let remote = Arc::new(MemoryRemote::new());
    let engine = SyncEngine::new(store.clone(), remote.clone(), &SyncConfig::default()).unwrap();
    (store, remote, Arc::new(engine))
}

async fn queued(store: &SqliteLocalStore) -> Vec<(OperationKind, String)> {
    store
        .pending_operations()
        .await
        .unwrap()
        .into_iter()
        .map(|op| (op.kind, op.item_id))
        .collect()
}

// =============================================================================
// Offline Writes
// =============================================================================

#[tokio::test]
async fn offline_mutations_all_succeed_and_apply_in_order() {
    let (store, remote, engine) = setup().await;
    remote.set_online(false);

    let mut a = Item::new("a", "").with_id("a");
    let mut b = Item::new("b", "").with_id("b");
    assert!(engine.add_item(&mut a).await.unwrap());
    assert!(engine.add_item(&mut b).await.unwrap());

    a.text = "a, edited".into();
    a.done = true;
    assert!(engine.update_item(&a).await.unwrap());
    assert!(engine.delete_item(&b).await.unwrap());

    let items = engine.get_items(true).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].text, "a, edited");
    assert!(items[0].done);

    assert_eq!(
        queued(&store).await,
        vec![
            (OperationKind::Insert, "a".to_string()),
            (OperationKind::Insert, "b".to_string()),
            (OperationKind::Update, "a".to_string()),
            (OperationKind::Delete, "b".to_string()),
        ]
    );
    assert!(remote.items(TABLE).is_empty());
}

// =============================================================================
// Push
// =============================================================================

#[tokio::test]
async fn reconnecting_drains_the_queue() {
    let (store, remote, engine) = setup().await;
    remote.set_online(false);

    let mut a = Item::new("a", "").with_id("a");
    let mut b = Item::new("b", "").with_id("b");
    engine.add_item(&mut a).await.unwrap();
    engine.add_item(&mut b).await.unwrap();
    a.text = "a2".into();
    engine.update_item(&a).await.unwrap();
    engine.delete_item(&b).await.unwrap();

    remote.set_online(true);
    let result = engine.push().await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.pushed, 4);
    assert!(result.resolutions.is_empty());
    assert!(queued(&store).await.is_empty());

    let server = remote.items(TABLE);
    assert_eq!(server.len(), 1);
    assert_eq!(server[0].text, "a2");
}

#[tokio::test]
async fn push_stops_exactly_at_first_transient_failure() {
    let (store, remote, engine) = setup().await;
    remote.set_online(false);
    for id in ["a", "b", "c", "d"] {
        engine
            .add_item(&mut Item::new(id, "").with_id(id))
            .await
            .unwrap();
    }

    remote.set_online(true);
    remote.fail_write_after(2, RemoteError::Timeout(30));
    let result = engine.push().await.unwrap();

    assert!(matches!(result.status, PushStatus::Aborted { transient: true, .. }));
    assert_eq!(result.pushed, 2);
    assert_eq!(
        queued(&store).await,
        vec![
            (OperationKind::Insert, "c".to_string()),
            (OperationKind::Insert, "d".to_string()),
        ]
    );
    let remaining = store.pending_operations().await.unwrap();
    assert_eq!(remaining[0].attempts, 1);
    assert!(remaining[0].last_error.is_some());
    assert_eq!(remaining[1].attempts, 0);

    assert!(engine.push().await.unwrap().is_success());
    assert!(queued(&store).await.is_empty());
    assert_eq!(remote.items(TABLE).len(), 4);
}

// =============================================================================
// Conflicts
// =============================================================================

#[tokio::test]
async fn update_conflict_takes_the_server_copy() {
    let (store, remote, engine) = setup().await;

    let mut x = Item::new("original", "").with_id("x");
    engine.add_item(&mut x).await.unwrap();
    let synced = engine.get_item("x").await.unwrap().unwrap();

    let server = remote.server_upsert(TABLE, Item::new("changed elsewhere", "").with_id("x"));

    remote.set_online(false);
    let mut edit = synced.clone();
    edit.text = "changed here".into();
    engine.update_item(&edit).await.unwrap();
    engine
        .add_item(&mut Item::new("unrelated", "").with_id("y"))
        .await
        .unwrap();

    remote.set_online(true);
    let result = engine.push().await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.pushed, 1);
    assert_eq!(result.resolutions.len(), 1);
    assert_eq!(result.resolutions[0].item_id, "x");
    assert_eq!(result.resolutions[0].table_name, TABLE);
    assert_eq!(
        result.resolutions[0].resolution,
        ConflictResolution::RevertedToServer
    );

    let local_x = store
        .query(&driftwood_core::ItemFilter::by_id("x"))
        .await
        .unwrap();
    assert_eq!(local_x, vec![server.clone()]);
    assert_eq!(remote.get(TABLE, "x"), Some(server));
    assert_eq!(remote.get(TABLE, "y").unwrap().text, "unrelated");
    assert!(queued(&store).await.is_empty());

    let status = engine.status().await;
    assert_eq!(status.stats.reverted, 1);
}

#[tokio::test]
async fn delete_conflict_without_server_copy_is_discarded() {
    let (store, remote, engine) = setup().await;

    let mut y = Item::new("doomed", "").with_id("y");
    engine.add_item(&mut y).await.unwrap();
    let synced = engine.get_item("y").await.unwrap().unwrap();

    remote.set_online(false);
    engine.delete_item(&synced).await.unwrap();
    remote.server_delete(TABLE, "y");

    remote.set_online(true);
    let result = engine.push().await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.resolutions.len(), 1);
    assert_eq!(result.resolutions[0].kind, OperationKind::Delete);
    assert_eq!(result.resolutions[0].resolution, ConflictResolution::Discarded);
    assert!(store.get_all().await.unwrap().is_empty());
    assert!(queued(&store).await.is_empty());
}

#[tokio::test]
async fn deleting_an_item_already_deleted_elsewhere_succeeds() {
    let (store, remote, engine) = setup().await;

    let mut y = Item::new("shared", "").with_id("y");
    engine.add_item(&mut y).await.unwrap();
    let synced = engine.get_item("y").await.unwrap().unwrap();

    remote.server_delete(TABLE, "y");
    assert!(engine.delete_item(&synced).await.unwrap());

    assert!(store.get_all().await.unwrap().is_empty());
    assert!(queued(&store).await.is_empty());
    assert_eq!(remote.get(TABLE, "y"), None);
    assert_eq!(engine.status().await.stats.discarded, 1);
}

#[tokio::test]
async fn queued_edit_survives_a_pull() {
    let (store, remote, engine) = setup().await;

    let mut a = Item::new("a", "").with_id("a");
    engine.add_item(&mut a).await.unwrap();
    let mut edit = engine.get_item("a").await.unwrap().unwrap();

    remote.set_online(false);
    edit.text = "local edit".into();
    engine.update_item(&edit).await.unwrap();
    remote.server_upsert(TABLE, Item::new("server edit", "").with_id("a"));

    remote.set_online(true);
    let seen = engine.get_item("a").await.unwrap().unwrap();
    assert_eq!(seen.text, "local edit");
    assert_eq!(queued(&store).await, vec![(OperationKind::Update, "a".to_string())]);

    let items = engine.get_items(true).await.unwrap();
    assert_eq!(items[0].text, "local edit");
}

// =============================================================================
// Initialization
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_initialization_binds_and_defines_schema_once() {
    let (store, remote, engine) = setup().await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.initialize().await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(engine.is_initialized());
    assert_eq!(remote.bind_count(), 1);
    assert_eq!(store.schema_definitions(), 1);
}

// =============================================================================
// Pull
// =============================================================================

#[tokio::test]
async fn repeated_pull_without_remote_changes_is_stable() {
    let (store, remote, engine) = setup().await;
    remote.server_upsert(TABLE, Item::new("a", "").with_id("a"));
    remote.server_upsert(TABLE, Item::new("b", "").with_id("b"));

    assert!(engine.pull().await.unwrap());
    let items = store.get_all().await.unwrap();
    let checkpoint = store.load_checkpoint(DEFAULT_QUERY_NAME).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(checkpoint.is_some());

    assert!(engine.pull().await.unwrap());
    assert_eq!(store.get_all().await.unwrap(), items);
    assert_eq!(
        store.load_checkpoint(DEFAULT_QUERY_NAME).await.unwrap(),
        checkpoint
    );
}

#[tokio::test]
async fn get_item_for_unknown_id_returns_none_after_pulling() {
    let (_, remote, engine) = setup().await;

    assert_eq!(engine.get_item("missing").await.unwrap(), None);
    assert_eq!(remote.query_count(), 1);

    remote.set_online(false);
    assert_eq!(engine.get_item("missing").await.unwrap(), None);
}

#[tokio::test]
async fn get_item_sees_records_written_elsewhere() {
    let (_, remote, engine) = setup().await;
    let server = remote.server_upsert(TABLE, Item::new("remote only", "").with_id("r"));

    assert_eq!(engine.get_item("r").await.unwrap(), Some(server));
    assert!(engine.get_items(false).await.unwrap().len() == 1);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn queued_changes_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("syncstore.db");
    let remote = Arc::new(MemoryRemote::new());
    remote.set_online(false);

    {
        let store = Arc::new(SqliteLocalStore::open(&path, TABLE).await.unwrap());
        let engine = SyncEngine::new(store.clone(), remote.clone(), &SyncConfig::default()).unwrap();
        engine
            .add_item(&mut Item::new("persisted", "").with_id("p"))
            .await
            .unwrap();
        store.database().close().await;
    }

    let store = Arc::new(SqliteLocalStore::open(&path, TABLE).await.unwrap());
    let engine = SyncEngine::new(store.clone(), remote.clone(), &SyncConfig::default()).unwrap();

    assert_eq!(engine.pending_count().await.unwrap(), 1);
    assert_eq!(engine.get_items(false).await.unwrap()[0].text, "persisted");

    remote.set_online(true);
    assert!(engine.sync().await.unwrap());
    assert_eq!(engine.pending_count().await.unwrap(), 0);
    assert_eq!(remote.get(TABLE, "p").unwrap().text, "persisted");
}
