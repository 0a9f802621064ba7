//! Schema versioning.
//!
//! A [`Versioner`] maps version numbers to upgrade steps. Moving a database
//! from `current` to `requested` runs every step numbered above `current` and
//! at most `requested`, in ascending order, inside one version change. Both
//! ends must be defined in the mapping, otherwise nothing runs.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde_json::Value;

use super::backend::{self, WriteMode};
use super::key::Key;
use crate::error::{Error, Result};

/// How an object store assigns primary keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreParams {
    pub key_path: Option<String>,
    pub auto_increment: bool,
}

impl StoreParams {
    /// Keys live inside each record at `key_path`.
    pub fn inline(key_path: &str) -> Self {
        StoreParams {
            key_path: Some(key_path.to_string()),
            auto_increment: false,
        }
    }

    /// Keys are supplied next to each record.
    pub fn out_of_line() -> Self {
        StoreParams::default()
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// The privileged transaction in which a database's structure may change.
pub struct VersionChange<'a> {
    conn: &'a Connection,
    old_version: u32,
    new_version: u32,
}

impl<'a> VersionChange<'a> {
    pub(crate) fn new(conn: &'a Connection, old_version: u32, new_version: u32) -> Self {
        VersionChange {
            conn,
            old_version,
            new_version,
        }
    }

    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    pub fn object_store_names(&self) -> Result<Vec<String>> {
        backend::store_names(self.conn)
    }

    pub fn create_object_store(&mut self, name: &str, params: StoreParams) -> Result<()> {
        backend::create_store(self.conn, name, params.key_path.as_deref(), params.auto_increment)
    }

    pub fn delete_object_store(&mut self, name: &str) -> Result<()> {
        backend::delete_store(self.conn, name)
    }

    pub fn create_index(&mut self, store: &str, name: &str, key_path: &str, unique: bool) -> Result<()> {
        backend::create_index(self.conn, store, name, key_path, unique)
    }

    pub fn delete_index(&mut self, store: &str, name: &str) -> Result<()> {
        backend::delete_index(self.conn, store, name)
    }

    /// Seeds a record while the structure is being built.
    pub fn put(&mut self, store: &str, value: Value, key: Option<Key>) -> Result<Key> {
        let info = backend::store_info(self.conn, store)?;
        backend::atomically(self.conn, |conn| {
            backend::write_record(conn, &info, value, key, WriteMode::Put)
        })
    }
}

pub type UpgradeStep = Box<dyn Fn(&mut VersionChange<'_>) -> Result<()> + Send + Sync>;

#[derive(Default)]
pub struct Versioner {
    steps: BTreeMap<u32, UpgradeStep>,
}

impl Versioner {
    pub fn new() -> Self {
        Versioner::default()
    }

    /// Defines the step that moves a database from `version - 1` to `version`.
    pub fn step<F>(mut self, version: u32, upgrade: F) -> Self
    where
        F: Fn(&mut VersionChange<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.steps.insert(version, Box::new(upgrade));
        self
    }

    /// Versions whose steps would run, in order.
    pub fn plan(&self, current: u32, requested: u32) -> Result<Vec<u32>> {
        for version in [current, requested] {
            if !self.steps.contains_key(&version) {
                return Err(Error::MissingVersionDefinition { version });
            }
        }
        if requested <= current {
            return Ok(Vec::new());
        }
        Ok(self
            .steps
            .range(current + 1..=requested)
            .map(|(version, _)| *version)
            .collect())
    }

    /// Runs the planned steps against `change`. Returns the versions applied.
    pub fn apply(&self, change: &mut VersionChange<'_>, current: u32, requested: u32) -> Result<Vec<u32>> {
        let plan = self.plan(current, requested)?;
        for version in &plan {
            tracing::debug!(version, "applying upgrade step");
            if let Some(upgrade) = self.steps.get(version) {
                upgrade(change)?;
            }
        }
        Ok(plan)
    }
}
