//! Snapshot metadata storage.
//!
//! Persists snapshots in an application-owned database with one object store:
//! - snapshots: autoincrementing `id`, indexed by origin, dbName, dbVersion,
//!   created and recordCount
//!
//! Supports:
//! - Adding a snapshot (never updating one)
//! - Loading a specific snapshot by ID
//! - Listing snapshots of one origin, newest first
//! - Deleting one snapshot, or every snapshot of one origin

pub mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::db::{self, Database, Factory, Key, KeyRange, Mode, StoreParams, Versioner};
use crate::error::{Error, Result};
pub use snapshot::{Snapshot, SnapshotSummary};

pub const METADATA_DB: &str = "kvsnap";
pub const METADATA_VERSION: u32 = 1;
pub const SNAPSHOTS: &str = "snapshots";

/// Secondary indexes on the snapshots store, as (index name, key path).
pub const INDEXES: [(&str, &str); 5] = [
    ("by_origin", "origin"),
    ("by_dbName", "dbName"),
    ("by_dbVersion", "dbVersion"),
    ("by_created", "created"),
    ("by_recordCount", "recordCount"),
];

/// Schema history of the metadata database.
pub fn versioner() -> Versioner {
    Versioner::new()
        .step(0, |_| Ok(()))
        .step(1, |change| {
            change.create_object_store(SNAPSHOTS, StoreParams::inline("id").auto_increment())?;
            for (index, key_path) in INDEXES {
                change.create_index(SNAPSHOTS, index, key_path, false)?;
            }
            Ok(())
        })
}

/// Handle on the metadata database. Holds no connection: every operation
/// opens its own.
#[derive(Clone)]
pub struct MetadataStore {
    factory: Factory,
    versioner: Arc<Versioner>,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MetadataStore {
            factory: Factory::new(root),
            versioner: Arc::new(versioner()),
        }
    }

    async fn connect(&self) -> Result<Database> {
        let versioner = Arc::clone(&self.versioner);
        self.factory
            .open_versioned(METADATA_DB, METADATA_VERSION, move |change| {
                let (from, to) = (change.old_version(), change.new_version());
                versioner.apply(change, from, to).map(|_| ())
            })
            .await
    }

    /// Persists `snapshot` under a fresh id and returns the id. Any id already
    /// set on `snapshot` is ignored.
    pub async fn add(&self, snapshot: &Snapshot) -> Result<u64> {
        let mut record = serde_json::to_value(snapshot)?;
        if let Some(fields) = record.as_object_mut() {
            fields.remove("id");
        }

        let db = self.connect().await?;
        let tx = db.transaction(&[SNAPSHOTS], Mode::ReadWrite).await?;
        let key = tx.object_store(SNAPSHOTS)?.add(record, None).await?;
        tx.commit().await?;

        let id = key_to_id(&key)?;
        tracing::info!(id, db = %snapshot.db_name, records = snapshot.record_count, "snapshot saved");
        Ok(id)
    }

    /// The full snapshot, or `None` when no snapshot has this id.
    pub async fn get(&self, id: u64) -> Result<Option<Snapshot>> {
        let db = self.connect().await?;
        let tx = db.transaction(&[SNAPSHOTS], Mode::ReadOnly).await?;
        let request = tx.object_store(SNAPSHOTS)?.get(Key::from(id));
        let parsed = db::adapt(request, |found| {
            found.map(serde_json::from_value::<Snapshot>).transpose()
        })
        .await?;
        Ok(parsed?)
    }

    /// Returns whether a snapshot was removed.
    pub async fn delete(&self, id: u64) -> Result<bool> {
        let db = self.connect().await?;
        let tx = db.transaction(&[SNAPSHOTS], Mode::ReadWrite).await?;
        let removed = tx.object_store(SNAPSHOTS)?.delete(KeyRange::only(id)).await?;
        tx.commit().await?;

        tracing::info!(id, removed, "snapshot deleted");
        Ok(removed > 0)
    }

    /// Metadata of every snapshot taken under `origin`, newest first.
    pub async fn list_by_origin(&self, origin: &str) -> Result<Vec<SnapshotSummary>> {
        let db = self.connect().await?;
        let tx = db.transaction(&[SNAPSHOTS], Mode::ReadOnly).await?;
        let by_origin = tx.object_store(SNAPSHOTS)?.index("by_origin")?;

        let rows = db::collect_with(&by_origin, Some(KeyRange::only(origin)), summarize).await?;
        newest_first(rows)
    }

    /// Metadata of every snapshot of every origin, newest first.
    pub async fn list_all(&self) -> Result<Vec<SnapshotSummary>> {
        let db = self.connect().await?;
        let tx = db.transaction(&[SNAPSHOTS], Mode::ReadOnly).await?;
        let store = tx.object_store(SNAPSHOTS)?;

        let rows = db::collect_with(&store, None, summarize).await?;
        newest_first(rows)
    }

    /// Removes every snapshot taken under `origin` in one walk over the
    /// by-origin index. Returns how many were removed.
    pub async fn delete_all_by_origin(&self, origin: &str) -> Result<u64> {
        let db = self.connect().await?;
        let tx = db.transaction(&[SNAPSHOTS], Mode::ReadWrite).await?;
        let by_origin = tx.object_store(SNAPSHOTS)?.index("by_origin")?;

        let removed = db::for_each(&by_origin, Some(KeyRange::only(origin)), 0u64, |step, n| {
            step.delete();
            n + 1
        })
        .await?;
        tx.commit().await?;

        tracing::info!(origin, removed, "snapshots deleted");
        Ok(removed)
    }
}

fn summarize(record: Value) -> serde_json::Result<SnapshotSummary> {
    serde_json::from_value(record)
}

fn newest_first(rows: Vec<serde_json::Result<SnapshotSummary>>) -> Result<Vec<SnapshotSummary>> {
    let mut rows = rows.into_iter().collect::<serde_json::Result<Vec<_>>>()?;
    rows.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
    Ok(rows)
}

fn key_to_id(key: &Key) -> Result<u64> {
    match key.as_number() {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as u64),
        _ => Err(Error::Data(format!("snapshot key {key:?} is not an id"))),
    }
}
