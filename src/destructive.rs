//! Clearing and deleting whole databases.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use crate::db::{self, Factory, Mode};
use crate::error::{Error, Result};

/// Observable "a long destructive operation is running" state.
///
/// Clones share one flag. There is no queue: overlapping operations all write
/// the same flag and the last write wins.
#[derive(Debug, Clone)]
pub struct ProcessingFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ProcessingFlag {
    fn default() -> Self {
        ProcessingFlag::new()
    }
}

impl ProcessingFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        ProcessingFlag { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Raises the flag until the returned guard is dropped.
    pub fn raise(&self) -> ProcessingGuard {
        self.tx.send_replace(true);
        ProcessingGuard { flag: self.clone() }
    }
}

#[must_use = "the flag is lowered as soon as the guard is dropped"]
pub struct ProcessingGuard {
    flag: ProcessingFlag,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.flag.tx.send_replace(false);
    }
}

/// Deletes every record of every object store of `db_name`, keeping the
/// stores and indexes. Returns the number of records deleted.
pub async fn clear(factory: &Factory, db_name: &str) -> Result<u64> {
    if !factory.exists(db_name).await? {
        return Err(Error::DatabaseNotFound(db_name.to_string()));
    }

    let db = factory.open(db_name).await?;
    let mut total = 0;
    for name in db.object_store_names() {
        let tx = db.transaction(&[name], Mode::ReadWrite).await?;
        let store = tx.object_store(name)?;
        let deleted = db::for_each(&store, None, 0u64, |step, n| {
            step.delete();
            n + 1
        })
        .await?;
        tx.commit().await?;

        tracing::debug!(db = db_name, store = %name, records = deleted, "store cleared");
        total += deleted;
    }

    tracing::info!(db = db_name, records = total, "database cleared");
    Ok(total)
}

/// Drops `db_name` with the processing flag raised for the whole call.
/// Returns whether the database existed.
pub async fn delete(factory: &Factory, db_name: &str, flag: &ProcessingFlag) -> Result<bool> {
    let _processing = flag.raise();
    let started = Instant::now();

    let existed = factory.delete_database(db_name).await?;
    tracing::info!(
        db = db_name,
        existed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "database deleted"
    );
    Ok(existed)
}
