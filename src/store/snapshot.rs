use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A point-in-time copy of every record in every object store of a database,
/// plus the metadata listings need without touching the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Assigned by the metadata store on insertion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub origin: String,
    pub db_name: String,
    /// Schema version of the source database, not of the snapshot
    pub db_version: u32,
    /// Capture time, milliseconds since the epoch
    pub created: i64,
    pub stores: Vec<String>,
    pub store_count: usize,
    pub record_count: usize,
    pub snapshot: BTreeMap<String, Vec<Value>>,
}

/// Snapshot metadata with the payload stripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: u64,
    pub origin: String,
    pub db_name: String,
    pub db_version: u32,
    pub created: i64,
    pub stores: Vec<String>,
    pub store_count: usize,
    pub record_count: usize,
}

impl Snapshot {
    /// Packages captured stores; counts are derived from the payload.
    pub fn new(
        origin: String,
        db_name: String,
        db_version: u32,
        created: i64,
        payload: Vec<(String, Vec<Value>)>,
    ) -> Self {
        let mut stores = Vec::with_capacity(payload.len());
        let mut snapshot = BTreeMap::new();
        for (store, records) in payload {
            if snapshot.contains_key(&store) {
                continue;
            }
            stores.push(store.clone());
            snapshot.insert(store, records);
        }

        Snapshot {
            id: None,
            origin,
            db_name,
            db_version,
            created,
            store_count: stores.len(),
            record_count: snapshot.values().map(Vec::len).sum(),
            stores,
            snapshot,
        }
    }

    /// Checks the cached counts and store list against the payload.
    pub fn is_consistent(&self) -> bool {
        let mut names = self.stores.clone();
        names.sort();
        names.dedup();

        names.len() == self.stores.len()
            && self.store_count == self.stores.len()
            && names.iter().eq(self.snapshot.keys())
            && self.record_count == self.snapshot.values().map(Vec::len).sum::<usize>()
    }

    /// Records captured for `store`, empty when the store is not part of it.
    pub fn records(&self, store: &str) -> &[Value] {
        self.snapshot.get(store).map(Vec::as_slice).unwrap_or(&[])
    }
}
