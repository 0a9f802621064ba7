//! Embedded versioned key/value databases.
//!
//! A [`Factory`] owns one directory, the storage area of one context. Each
//! database in it is a single SQLite file holding named object stores of json
//! records, their secondary indexes, and a schema version that only moves
//! forward through [`Factory::open_versioned`].

mod backend;
pub mod cursor;
pub mod key;
pub mod request;
pub mod schema;
pub mod transaction;

use std::path::{Path, PathBuf};

use rusqlite::TransactionBehavior;
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::platform;
use request::Request;
use schema::VersionChange;

pub use cursor::{collect, collect_with, count_step, for_each, tally, Cursor, Step, Walk};
pub use key::{Key, KeyRange};
pub use request::adapt;
pub use schema::{StoreParams, Versioner};
pub use transaction::{Index, Mode, ObjectStore, Transaction};

const DB_EXTENSION: &str = "kvdb";

type Upgrade = Box<dyn FnOnce(&mut VersionChange<'_>) -> Result<()> + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u32,
}

/// File in a storage area naming whoever owns it, since the directory name
/// may only carry a digest of it.
pub const OWNER_MARKER: &str = "owner";

#[derive(Debug, Clone)]
pub struct Factory {
    root: PathBuf,
    owner: Option<String>,
}

impl Factory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Factory {
            root: root.into(),
            owner: None,
        }
    }

    /// A storage area that records `owner` in [`OWNER_MARKER`] when it is
    /// first created.
    pub fn owned_by(root: impl Into<PathBuf>, owner: impl Into<String>) -> Self {
        Factory {
            root: root.into(),
            owner: Some(owner.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{DB_EXTENSION}", platform::path_component(name)))
    }

    /// Every database in this storage area, sorted by name.
    pub async fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        let root = self.root.clone();
        Request::spawn(move || {
            if !root.exists() {
                return Ok(Vec::new());
            }

            let mut found = Vec::new();
            for entry in WalkDir::new(&root).min_depth(1).max_depth(1) {
                let entry = entry.map_err(|e| Error::Request(e.to_string()))?;
                let path = entry.path();
                if !entry.file_type().is_file()
                    || path.extension().and_then(|e| e.to_str()) != Some(DB_EXTENSION)
                {
                    continue;
                }

                match backend::connect(path).and_then(|conn| backend::identity(&conn)) {
                    // version 0 means creation never completed
                    Ok(Some((name, version))) if version > 0 => {
                        found.push(DatabaseInfo { name, version })
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(path = %path.display(), error = %err, "skipping unreadable database file")
                    }
                }
            }

            found.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(found)
        })
        .await
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.databases().await?.iter().any(|info| info.name == name))
    }

    /// Opens at the current version. A database that does not exist yet is
    /// created empty at version 1; no upgrade ever runs.
    pub async fn open(&self, name: &str) -> Result<Database> {
        self.open_inner(name, None).await
    }

    /// Opens at `version`, running `upgrade` in a version change when the
    /// stored version is lower. Any failure inside `upgrade` rolls back every
    /// structural change made so far.
    pub async fn open_versioned<F>(&self, name: &str, version: u32, upgrade: F) -> Result<Database>
    where
        F: FnOnce(&mut VersionChange<'_>) -> Result<()> + Send + 'static,
    {
        if version == 0 {
            return Err(Error::Data("database version must be at least 1".into()));
        }
        let upgrade: Upgrade = Box::new(upgrade);
        self.open_inner(name, Some((version, upgrade))).await
    }

    async fn open_inner(&self, name: &str, target: Option<(u32, Upgrade)>) -> Result<Database> {
        let root = self.root.clone();
        let owner = self.owner.clone();
        let path = self.path_for(name);
        let name = name.to_string();

        Request::spawn(move || {
            let wanted = target.as_ref().map(|(version, _)| *version);
            if let Some(db) = open_existing(&path, &name, wanted)? {
                return Ok(db);
            }

            std::fs::create_dir_all(&root)?;
            if let Some(owner) = owner {
                let marker = root.join(OWNER_MARKER);
                if !marker.exists() {
                    std::fs::write(&marker, owner)?;
                }
            }
            let mut conn = backend::connect(&path)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = backend::init(&tx, &name)?;

            let version = match target {
                Some((requested, _)) if requested < current => {
                    return Err(Error::Version { requested, current });
                }
                Some((requested, upgrade)) if requested > current => {
                    tracing::info!(db = %name, from = current, to = requested, "upgrading database");
                    let mut change = VersionChange::new(&tx, current, requested);
                    upgrade(&mut change)?;
                    backend::set_version(&tx, requested)?;
                    requested
                }
                Some(_) => current,
                None if current == 0 => {
                    backend::set_version(&tx, 1)?;
                    1
                }
                None => current,
            };

            let store_names = backend::store_names(&tx)?;
            tx.commit()?;

            Ok(Database {
                name,
                version,
                path,
                store_names,
            })
        })
        .await
    }

    /// Drops a database with all its stores. Returns whether it existed.
    pub async fn delete_database(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name);
        Request::spawn(move || {
            let existed = path.exists();
            for suffix in ["", "-wal", "-shm"] {
                let mut file = path.clone().into_os_string();
                file.push(suffix);
                match std::fs::remove_file(&file) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
            Ok(existed)
        })
        .await
    }
}

/// Opens a database that already exists at `wanted` (or at any version) in
/// a read transaction, so it never waits behind a writer. `None` when the
/// file must be created or upgraded first.
fn open_existing(path: &Path, name: &str, wanted: Option<u32>) -> Result<Option<Database>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut conn = backend::connect(path)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
    let version = match backend::existing_version(&tx)? {
        Some(version) if version > 0 && wanted.map_or(true, |w| w == version) => version,
        _ => return Ok(None),
    };
    let store_names = backend::store_names(&tx)?;
    tx.commit()?;

    Ok(Some(Database {
        name: name.to_string(),
        version,
        path: path.to_path_buf(),
        store_names,
    }))
}

/// An open database: its identity plus the object stores it had when opened.
#[derive(Debug, Clone)]
pub struct Database {
    name: String,
    version: u32,
    path: PathBuf,
    store_names: Vec<String>,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Object store names in sorted order.
    pub fn object_store_names(&self) -> &[String] {
        &self.store_names
    }

    pub async fn transaction<S: AsRef<str>>(&self, scope: &[S], mode: Mode) -> Result<Transaction> {
        let scope = scope.iter().map(|s| s.as_ref().to_string()).collect();
        Transaction::begin(self.path.clone(), self.name.clone(), scope, mode).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    pub(crate) fn people() -> Vec<Value> {
        vec![
            json!({"id": 1, "name": "ada", "team": "red"}),
            json!({"id": 2, "name": "bo", "team": "blue"}),
            json!({"id": 3, "name": "cy", "team": "red"}),
            json!({"id": 4, "name": "di", "team": "blue"}),
        ]
    }

    /// A database with a populated `people` store indexed by team, and an
    /// `empty` store.
    pub(crate) async fn people_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let factory = Factory::new(dir.path());
        let db = factory
            .open_versioned("people", 1, |change| {
                change.create_object_store("people", StoreParams::inline("id"))?;
                change.create_index("people", "by_team", "team", false)?;
                change.create_object_store("empty", StoreParams::out_of_line().auto_increment())?;
                for person in people() {
                    change.put("people", person, None)?;
                }
                Ok(())
            })
            .await
            .unwrap();
        (dir, db)
    }
}
