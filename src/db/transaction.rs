//! Transactions and the object store / index handles scoped to them.
//!
//! Each transaction owns one SQLite connection driven by a dedicated worker
//! thread. Requests are queued on that worker in the order they are issued,
//! so writes issued in program order apply in that order, and they commit or
//! roll back together.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::mpsc;

use super::backend::{self, IndexInfo, StoreInfo, WriteMode};
use super::cursor::{Cursor, Source};
use super::key::{Key, KeyRange};
use super::request::Request;
use crate::error::{Error, Result};

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug)]
pub(crate) struct Shared {
    db: String,
    mode: Mode,
    stores: HashMap<String, StoreInfo>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl Shared {
    /// Queues `op` on the worker. Requests after commit or abort fail with
    /// `InvalidState`.
    pub(crate) fn issue<T, F>(&self, op: F) -> Request<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let (completer, request) = Request::channel();
        let job: Job = Box::new(move |conn: &mut Connection| {
            let outcome = if conn.is_autocommit() {
                Err(Error::InvalidState("transaction has finished".into()))
            } else {
                op(&*conn)
            };
            completer.settle(outcome);
        });
        // a closed queue drops the completer, which settles the request as failed
        let _ = self.jobs.send(job);
        request
    }

    pub(crate) fn write<T, F>(&self, op: F) -> Request<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        if self.mode == Mode::ReadOnly {
            return Request::failed(Error::ReadOnly);
        }
        self.issue(move |conn| backend::atomically(conn, op))
    }
}

fn run_worker(mut conn: Connection, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.blocking_recv() {
        job(&mut conn);
    }
    // every handle is gone; anything not committed is discarded
    if !conn.is_autocommit() {
        if let Err(err) = conn.execute_batch("ROLLBACK") {
            tracing::warn!(error = %err, "rollback of abandoned transaction failed");
        }
    }
}

#[derive(Debug)]
pub struct Transaction {
    shared: Arc<Shared>,
}

impl Transaction {
    pub(crate) async fn begin(path: PathBuf, db: String, scope: Vec<String>, mode: Mode) -> Result<Transaction> {
        if scope.is_empty() {
            return Err(Error::InvalidState("transaction scope is empty".into()));
        }

        let (conn, stores) = Request::spawn(move || {
            let conn = backend::connect(&path)?;
            conn.execute_batch(match mode {
                Mode::ReadOnly => "BEGIN DEFERRED",
                Mode::ReadWrite => "BEGIN IMMEDIATE",
            })?;
            let mut stores = HashMap::new();
            for name in scope {
                let info = backend::store_info(&conn, &name)?;
                stores.insert(name, info);
            }
            Ok((conn, stores))
        })
        .await?;

        let (jobs, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name(format!("kvsnap-tx-{db}"))
            .spawn(move || run_worker(conn, rx))?;

        tracing::trace!(db = %db, ?mode, "transaction started");
        Ok(Transaction {
            shared: Arc::new(Shared {
                db,
                mode,
                stores,
                jobs,
            }),
        })
    }

    pub fn mode(&self) -> Mode {
        self.shared.mode
    }

    pub fn db_name(&self) -> &str {
        &self.shared.db
    }

    pub fn object_store(&self, name: &str) -> Result<ObjectStore> {
        let info = self
            .shared
            .stores
            .get(name)
            .cloned()
            .ok_or_else(|| Error::StoreNotFound(name.to_string()))?;
        Ok(ObjectStore {
            shared: Arc::clone(&self.shared),
            info,
        })
    }

    /// Makes every write of this transaction durable.
    pub async fn commit(self) -> Result<()> {
        self.shared
            .issue(|conn| {
                conn.execute_batch("COMMIT")?;
                Ok(())
            })
            .await
    }

    /// Discards every write of this transaction.
    pub async fn abort(self) -> Result<()> {
        self.shared
            .issue(|conn| {
                conn.execute_batch("ROLLBACK")?;
                Ok(())
            })
            .await
    }
}

/// A collection inside a transaction's scope.
#[derive(Clone)]
pub struct ObjectStore {
    shared: Arc<Shared>,
    info: StoreInfo,
}

impl ObjectStore {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn key_path(&self) -> Option<&str> {
        self.info.key_path.as_deref()
    }

    pub fn auto_increment(&self) -> bool {
        self.info.auto_increment
    }

    /// Secondary index names in sorted order.
    pub fn index_names(&self) -> Vec<String> {
        self.info.indexes.iter().map(|i| i.name.clone()).collect()
    }

    pub fn get(&self, key: Key) -> Request<Option<Value>> {
        let store = self.info.name.clone();
        self.shared.issue(move |conn| backend::get(conn, &store, &key))
    }

    pub fn get_all(&self, range: Option<KeyRange>) -> Request<Vec<Value>> {
        let store = self.info.name.clone();
        self.shared
            .issue(move |conn| backend::get_all(conn, &store, range.as_ref()))
    }

    pub fn count(&self, range: Option<KeyRange>) -> Request<u64> {
        let store = self.info.name.clone();
        self.shared
            .issue(move |conn| backend::count(conn, &store, range.as_ref()))
    }

    /// Inserts or overwrites by key.
    pub fn put(&self, value: Value, key: Option<Key>) -> Request<Key> {
        let info = self.info.clone();
        self.shared
            .write(move |conn| backend::write_record(conn, &info, value, key, WriteMode::Put))
    }

    /// Inserts; an existing record under the same key is a constraint error.
    pub fn add(&self, value: Value, key: Option<Key>) -> Request<Key> {
        let info = self.info.clone();
        self.shared
            .write(move |conn| backend::write_record(conn, &info, value, key, WriteMode::Add))
    }

    pub fn delete(&self, range: KeyRange) -> Request<u64> {
        let store = self.info.name.clone();
        self.shared
            .write(move |conn| backend::delete_range(conn, &store, &range))
    }

    pub fn clear(&self) -> Request<u64> {
        let store = self.info.name.clone();
        self.shared.write(move |conn| backend::clear(conn, &store))
    }

    pub fn index(&self, name: &str) -> Result<Index> {
        let info = self
            .info
            .indexes
            .iter()
            .find(|i| i.name == name)
            .cloned()
            .ok_or_else(|| Error::IndexNotFound {
                store: self.info.name.clone(),
                index: name.to_string(),
            })?;
        Ok(Index {
            shared: Arc::clone(&self.shared),
            store: self.info.clone(),
            info,
        })
    }

    pub fn open_cursor(&self, range: Option<KeyRange>) -> Cursor {
        Cursor::new(Arc::clone(&self.shared), self.info.clone(), Source::Store, range)
    }
}

/// A secondary index of an object store.
#[derive(Clone)]
pub struct Index {
    shared: Arc<Shared>,
    store: StoreInfo,
    info: IndexInfo,
}

impl Index {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn key_path(&self) -> &str {
        &self.info.key_path
    }

    pub fn unique(&self) -> bool {
        self.info.unique
    }

    pub fn get_all(&self, range: Option<KeyRange>) -> Request<Vec<Value>> {
        let store = self.store.name.clone();
        let index = self.info.name.clone();
        self.shared
            .issue(move |conn| backend::index_get_all(conn, &store, &index, range.as_ref()))
    }

    pub fn count(&self, range: Option<KeyRange>) -> Request<u64> {
        let store = self.store.name.clone();
        let index = self.info.name.clone();
        self.shared
            .issue(move |conn| backend::index_count(conn, &store, &index, range.as_ref()))
    }

    pub fn open_cursor(&self, range: Option<KeyRange>) -> Cursor {
        Cursor::new(
            Arc::clone(&self.shared),
            self.store.clone(),
            Source::Index(self.info.clone()),
            range,
        )
    }
}
