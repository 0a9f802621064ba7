//! Capture and restore of whole databases.

use futures::future::join_all;

use crate::db::{Factory, Mode};
use crate::error::{Error, Result};
use crate::store::Snapshot;

/// Captures databases of one context and writes snapshots back into it.
#[derive(Debug, Clone)]
pub struct SnapshotEngine {
    factory: Factory,
    origin: String,
}

impl SnapshotEngine {
    /// `origin` must already be resolved; it is recorded on every capture.
    pub fn new(factory: Factory, origin: impl Into<String>) -> Self {
        SnapshotEngine {
            factory,
            origin: origin.into(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Reads every record of every object store of `db_name`.
    ///
    /// Each store is read in its own read-only transaction, so stores written
    /// concurrently may be seen at different instants. The database is opened
    /// at whatever version it has; the recorded version is that one.
    pub async fn capture(&self, db_name: &str, db_version: u32) -> Result<Snapshot> {
        if !self.factory.exists(db_name).await? {
            return Err(Error::DatabaseNotFound(db_name.to_string()));
        }

        let db = self.factory.open(db_name).await?;
        if db.version() != db_version {
            tracing::warn!(
                db = db_name,
                requested = db_version,
                actual = db.version(),
                "capturing at the database's current version"
            );
        }

        let mut payload = Vec::with_capacity(db.object_store_names().len());
        for name in db.object_store_names() {
            let tx = db.transaction(&[name], Mode::ReadOnly).await?;
            let records = tx.object_store(name)?.get_all(None).await?;
            tx.commit().await?;

            tracing::debug!(db = db_name, store = %name, records = records.len(), "store captured");
            payload.push((name.clone(), records));
        }

        let snapshot = Snapshot::new(
            self.origin.clone(),
            db_name.to_string(),
            db.version(),
            chrono::Utc::now().timestamp_millis(),
            payload,
        );
        tracing::info!(
            db = db_name,
            stores = snapshot.store_count,
            records = snapshot.record_count,
            "database captured"
        );
        Ok(snapshot)
    }

    /// Writes every captured record back with put semantics, all in one
    /// read-write transaction. Returns the number of records written.
    ///
    /// Records already in the database but absent from the snapshot are left
    /// alone. If any write fails nothing is written.
    pub async fn restore(&self, snapshot: &Snapshot) -> Result<u64> {
        let db_name = snapshot.db_name.as_str();
        if !snapshot.is_consistent() {
            return Err(Error::Data(format!(
                "snapshot of {db_name} does not match its store list or counts"
            )));
        }
        if !self.factory.exists(db_name).await? {
            return Err(Error::DatabaseNotFound(db_name.to_string()));
        }
        if snapshot.stores.is_empty() {
            return Ok(0);
        }

        let failed = |source: Error| Error::RestoreFailed {
            db: db_name.to_string(),
            source: Box::new(source),
        };

        let db = self.factory.open(db_name).await?;
        let tx = db
            .transaction(&snapshot.stores, Mode::ReadWrite)
            .await
            .map_err(failed)?;

        let mut writes = Vec::with_capacity(snapshot.snapshot.values().map(Vec::len).sum());
        for name in &snapshot.stores {
            let store = tx.object_store(name).map_err(failed)?;
            for record in snapshot.records(name) {
                writes.push(store.put(record.clone(), None));
            }
        }

        let mut written = 0u64;
        for outcome in join_all(writes).await {
            if let Err(err) = outcome {
                tracing::error!(db = db_name, error = %err, "restore write failed, rolling back");
                if let Err(abort_err) = tx.abort().await {
                    tracing::warn!(db = db_name, error = %abort_err, "rollback after failed restore");
                }
                return Err(failed(err));
            }
            written += 1;
        }

        tx.commit().await.map_err(failed)?;
        tracing::info!(db = db_name, records = written, "snapshot restored");
        Ok(written)
    }
}
