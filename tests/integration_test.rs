use kvsnap::commands::{Handler, Message, Reply};
use kvsnap::config::Config;
use kvsnap::db::{Mode, StoreParams, OWNER_MARKER};
use kvsnap::logging;
use kvsnap::Error;
use serde_json::{json, Value};
use tempfile::TempDir;

fn handler(dir: &TempDir, origin: &str) -> Handler {
    let mut config = Config::with_data_dir(dir.path());
    config.origin = origin.to_string();
    Handler::new(&config)
}

/// `shop` at version 2: orders (3 records, indexed by user) and users (2).
async fn seed_shop(handler: &Handler) {
    logging::init_test();
    handler
        .factory()
        .open_versioned("shop", 2, |change| {
            change.create_object_store("orders", StoreParams::inline("id").auto_increment())?;
            change.create_index("orders", "by_user", "user", false)?;
            change.create_object_store("users", StoreParams::inline("name"))?;
            for user in ["ada", "bo", "ada"] {
                change.put("orders", json!({"user": user}), None)?;
            }
            change.put("users", json!({"name": "ada"}), None)?;
            change.put("users", json!({"name": "bo"}), None)?;
            Ok(())
        })
        .await
        .unwrap();
}

async fn all_records(handler: &Handler, store: &str) -> Vec<Value> {
    let db = handler.factory().open("shop").await.unwrap();
    let tx = db.transaction(&[store], Mode::ReadOnly).await.unwrap();
    tx.object_store(store).unwrap().get_all(None).await.unwrap()
}

async fn snapshot(handler: &Handler) -> u64 {
    let reply = handler
        .handle(Message::Snapshot { db_name: "shop".into(), db_version: 2 })
        .await
        .unwrap();
    match reply {
        Reply::Created(id) => id,
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test]
async fn snapshot_of_shop_has_expected_counts() {
    let dir = TempDir::new().unwrap();
    let handler = handler(&dir, "https://shop.example");
    seed_shop(&handler).await;

    let id = snapshot(&handler).await;
    let saved = handler.metadata().get(id).await.unwrap().unwrap();

    assert_eq!(saved.origin, "https://shop.example");
    assert_eq!(saved.db_version, 2);
    assert_eq!(saved.store_count, 2);
    assert_eq!(saved.record_count, 5);
    assert_eq!(saved.stores, vec!["orders", "users"]);
}

#[tokio::test]
async fn clear_then_kickoff_restore_round_trips() {
    let dir = TempDir::new().unwrap();
    let handler = handler(&dir, "https://shop.example");
    seed_shop(&handler).await;
    let before_orders = all_records(&handler, "orders").await;
    let before_users = all_records(&handler, "users").await;

    let id = snapshot(&handler).await;
    let cleared = handler
        .handle(Message::Clear { db_name: "shop".into(), db_version: 2 })
        .await
        .unwrap();
    assert_eq!(cleared, Reply::Count(5));
    assert!(all_records(&handler, "orders").await.is_empty());

    let restored = handler
        .handle(Message::KickoffSnapshotRestore { id })
        .await
        .unwrap();
    assert_eq!(restored, Reply::Count(5));
    assert_eq!(all_records(&handler, "orders").await, before_orders);
    assert_eq!(all_records(&handler, "users").await, before_users);
}

#[tokio::test]
async fn restore_snapshot_message_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let handler = handler(&dir, "https://shop.example");
    seed_shop(&handler).await;

    let id = snapshot(&handler).await;
    let package = handler.metadata().get(id).await.unwrap().unwrap();

    for _ in 0..2 {
        let reply = handler
            .handle(Message::RestoreSnapshot { snapshot: package.clone() })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Count(5));
    }
    assert_eq!(all_records(&handler, "orders").await.len(), 3);
    assert_eq!(all_records(&handler, "users").await.len(), 2);
}

#[tokio::test]
async fn delete_all_only_touches_current_origin() {
    let dir = TempDir::new().unwrap();
    let a = handler(&dir, "https://a.example");
    let b = handler(&dir, "https://b.example");
    seed_shop(&a).await;
    seed_shop(&b).await;

    snapshot(&a).await;
    snapshot(&a).await;
    let kept = snapshot(&b).await;

    assert_eq!(a.handle(Message::SnapshotDeleteAll).await.unwrap(), Reply::Count(2));
    assert_eq!(a.handle(Message::ListSnapshots).await.unwrap(), Reply::Snapshots(Vec::new()));

    match b.handle(Message::ListSnapshots).await.unwrap() {
        Reply::Snapshots(rows) => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].id, kept);
            assert_eq!(rows[0].origin, "https://b.example");
        }
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test]
async fn origins_have_separate_databases() {
    let dir = TempDir::new().unwrap();
    let a = handler(&dir, "https://a.example");
    let b = handler(&dir, "https://b.example");
    seed_shop(&a).await;

    let err = b
        .handle(Message::Snapshot { db_name: "shop".into(), db_version: 2 })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DatabaseNotFound(_)));
}

#[tokio::test]
async fn list_databases_has_one_row_per_store() {
    let dir = TempDir::new().unwrap();
    let handler = handler(&dir, "https://shop.example");
    seed_shop(&handler).await;
    handler.factory().open("empty").await.unwrap();

    match handler.handle(Message::ListDatabases).await.unwrap() {
        Reply::Databases(rows) => {
            assert_eq!(rows.len(), 2);
            assert_eq!(rows.iter().map(|r| r.count).sum::<u64>(), 5);
            assert_eq!(rows[0].store, "orders");
            assert_eq!(rows[0].indexes, "by_user");
        }
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test]
async fn delete_drops_database_and_lowers_flag() {
    let dir = TempDir::new().unwrap();
    let handler = handler(&dir, "https://shop.example");
    seed_shop(&handler).await;

    let reply = handler
        .handle(Message::Delete { db_name: "shop".into(), db_version: 2 })
        .await
        .unwrap();
    assert_eq!(reply, Reply::Done);
    assert!(!handler.processing().is_raised());
    assert!(!handler.factory().exists("shop").await.unwrap());
}

#[tokio::test]
async fn kickoff_of_unknown_snapshot_fails() {
    let dir = TempDir::new().unwrap();
    let handler = handler(&dir, "https://shop.example");

    let err = handler
        .handle(Message::KickoffSnapshotRestore { id: 77 })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SnapshotNotFound(77)));
}

#[tokio::test]
async fn snapshot_delete_removes_only_that_snapshot() {
    let dir = TempDir::new().unwrap();
    let handler = handler(&dir, "https://shop.example");
    seed_shop(&handler).await;

    let first = snapshot(&handler).await;
    let second = snapshot(&handler).await;
    handler.handle(Message::SnapshotDelete { id: first }).await.unwrap();

    assert!(handler.metadata().get(first).await.unwrap().is_none());
    assert!(handler.metadata().get(second).await.unwrap().is_some());
}

#[tokio::test]
async fn opaque_origin_embeds_location() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::with_data_dir(dir.path());
    config.location = "file:///home/dev/app/index.html".into();
    let handler = Handler::new(&config);

    let reply = handler.handle(Message::GetOrigin).await.unwrap();
    assert_eq!(reply, Reply::Origin("opaque:file:///home/dev/app/index.html".into()));
}

#[tokio::test]
async fn long_opaque_location_gets_its_own_storage_area() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::with_data_dir(dir.path());
    config.location = format!("file:///home/dev/{}/index.html", "nested/".repeat(40));
    assert!(config.location.len() > 300);
    let handler = Handler::new(&config);
    seed_shop(&handler).await;

    let id = snapshot(&handler).await;
    let rows = match handler.handle(Message::ListDatabases).await.unwrap() {
        Reply::Databases(rows) => rows,
        other => panic!("unexpected reply {other:?}"),
    };
    assert_eq!(rows.len(), 2);

    let marker = std::fs::read_to_string(handler.factory().root().join(OWNER_MARKER)).unwrap();
    assert_eq!(marker, handler.origin());
    let saved = handler.metadata().get(id).await.unwrap().unwrap();
    assert_eq!(saved.origin, handler.origin());
}

#[tokio::test]
async fn tampered_package_is_rejected_before_writing() {
    let dir = TempDir::new().unwrap();
    let handler = handler(&dir, "https://shop.example");
    seed_shop(&handler).await;
    let id = snapshot(&handler).await;
    handler
        .handle(Message::Clear { db_name: "shop".into(), db_version: 2 })
        .await
        .unwrap();

    let mut package = serde_json::to_value(handler.metadata().get(id).await.unwrap().unwrap()).unwrap();
    package["recordCount"] = json!(u64::MAX);
    let text = json!({"command": "restore-snapshot", "snapshot": package}).to_string();

    let err = handler.handle_json(&text).await.unwrap_err();
    assert!(matches!(err, Error::Data(_)));
    assert!(all_records(&handler, "orders").await.is_empty());
    assert!(all_records(&handler, "users").await.is_empty());
}

#[tokio::test]
async fn json_boundary_round_trips() {
    let dir = TempDir::new().unwrap();
    let handler = handler(&dir, "https://shop.example");
    seed_shop(&handler).await;

    let reply = handler
        .handle_json(r#"{"command": "snapshot", "dbName": "shop", "dbVersion": 2}"#)
        .await
        .unwrap();
    assert_eq!(serde_json::from_str::<Value>(&reply).unwrap(), json!({"result": "created", "value": 1}));

    let reply = handler.handle_json(r#"{"command": "list-snapshots"}"#).await.unwrap();
    let parsed: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(parsed["value"][0]["recordCount"], 5);
    assert!(parsed["value"][0].get("snapshot").is_none());
}
