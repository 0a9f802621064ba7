//! Cursor walks over object stores and indexes.
//!
//! A [`Cursor`] moves forward one record at a time, in ascending key order of
//! the store or index it walks, optionally bounded by a [`KeyRange`]. Each
//! step is its own request against the transaction, so a walk is restartable
//! per call but never resumed from the middle, and deleting the current record
//! never disturbs the position.
//!
//! [`collect`] and [`for_each`] are the two walk shapes everything else uses.

use std::sync::Arc;

use serde_json::Value;

use super::backend::{self, IndexInfo, StoreInfo};
use super::key::{Key, KeyRange};
use super::transaction::{Index, ObjectStore, Shared};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) enum Source {
    Store,
    Index(IndexInfo),
}

#[derive(Debug, Clone)]
struct Current {
    key: Key,
    primary_key: Key,
    value: Value,
}

pub struct Cursor {
    shared: Arc<Shared>,
    store: StoreInfo,
    source: Source,
    range: Option<KeyRange>,
    position: Option<(Vec<u8>, Vec<u8>)>,
    current: Option<Current>,
}

impl Cursor {
    pub(crate) fn new(shared: Arc<Shared>, store: StoreInfo, source: Source, range: Option<KeyRange>) -> Cursor {
        Cursor {
            shared,
            store,
            source,
            range,
            position: None,
            current: None,
        }
    }

    /// Moves to the next record. Returns false once the walk is exhausted.
    pub async fn advance(&mut self) -> Result<bool> {
        let store = self.store.name.clone();
        let source = self.source.clone();
        let range = self.range.clone();
        let after = self.position.clone();

        let row = self
            .shared
            .issue(move |conn| match &source {
                Source::Store => backend::next_store_row(
                    conn,
                    &store,
                    range.as_ref(),
                    after.as_ref().map(|(key, _)| key.as_slice()),
                ),
                Source::Index(index) => backend::next_index_row(
                    conn,
                    &store,
                    &index.name,
                    range.as_ref(),
                    after
                        .as_ref()
                        .map(|(key, primary)| (key.as_slice(), primary.as_slice())),
                ),
            })
            .await?;

        let Some(row) = row else {
            self.current = None;
            return Ok(false);
        };
        self.current = Some(Current {
            key: Key::decode(&row.key)?,
            primary_key: Key::decode(&row.primary_key)?,
            value: row.value,
        });
        self.position = Some((row.key, row.primary_key));
        Ok(true)
    }

    /// Key of the current record in the walked source (index key for index
    /// walks).
    pub fn key(&self) -> Option<&Key> {
        self.current.as_ref().map(|c| &c.key)
    }

    pub fn primary_key(&self) -> Option<&Key> {
        self.current.as_ref().map(|c| &c.primary_key)
    }

    pub fn value(&self) -> Option<&Value> {
        self.current.as_ref().map(|c| &c.value)
    }

    fn current_primary(&self) -> Result<Vec<u8>> {
        self.position
            .as_ref()
            .filter(|_| self.current.is_some())
            .map(|(_, primary)| primary.clone())
            .ok_or_else(|| Error::InvalidState("cursor is not positioned on a record".into()))
    }

    /// Deletes the record the cursor points at.
    pub async fn delete(&self) -> Result<()> {
        let primary = self.current_primary()?;
        let store = self.store.name.clone();
        self.shared
            .write(move |conn| backend::delete_record(conn, &store, &primary))
            .await
    }

    /// Replaces the value of the record the cursor points at.
    pub async fn update(&self, value: Value) -> Result<()> {
        let primary = self.current_primary()?;
        let store = self.store.clone();
        self.shared
            .write(move |conn| backend::update_record(conn, &store, &primary, value))
            .await
    }

    fn take_value(&mut self) -> Option<Value> {
        self.current.as_mut().map(|c| std::mem::take(&mut c.value))
    }
}

/// Anything a cursor can walk.
pub trait Walk {
    fn open_cursor(&self, range: Option<KeyRange>) -> Cursor;
}

impl Walk for ObjectStore {
    fn open_cursor(&self, range: Option<KeyRange>) -> Cursor {
        ObjectStore::open_cursor(self, range)
    }
}

impl Walk for Index {
    fn open_cursor(&self, range: Option<KeyRange>) -> Cursor {
        Index::open_cursor(self, range)
    }
}

enum Action {
    Delete,
    Update(Value),
}

/// The record a [`for_each`] step is looking at. Deletion or update requested
/// here is applied before the walk moves on.
pub struct Step<'a> {
    key: &'a Key,
    primary_key: &'a Key,
    value: &'a Value,
    action: Option<Action>,
}

impl Step<'_> {
    pub fn key(&self) -> &Key {
        self.key
    }

    pub fn primary_key(&self) -> &Key {
        self.primary_key
    }

    pub fn value(&self) -> &Value {
        self.value
    }

    pub fn delete(&mut self) {
        self.action = Some(Action::Delete);
    }

    pub fn update(&mut self, value: Value) {
        self.action = Some(Action::Update(value));
    }
}

/// Every record in range, in walk order.
pub async fn collect<W: Walk>(target: &W, range: Option<KeyRange>) -> Result<Vec<Value>> {
    collect_with(target, range, |value| value).await
}

/// `transform(record)` for every record in range, in walk order. A failed
/// step fails the whole walk.
pub async fn collect_with<W, T, F>(target: &W, range: Option<KeyRange>, mut transform: F) -> Result<Vec<T>>
where
    W: Walk,
    F: FnMut(Value) -> T,
{
    let mut cursor = target.open_cursor(range);
    let mut out = Vec::new();
    while cursor.advance().await? {
        if let Some(value) = cursor.take_value() {
            out.push(transform(value));
        }
    }
    Ok(out)
}

/// Folds `step` over every record in range, applying any delete or update
/// the step requests.
pub async fn for_each<W, A, F>(target: &W, range: Option<KeyRange>, seed: A, mut step: F) -> Result<A>
where
    W: Walk,
    F: FnMut(&mut Step<'_>, A) -> A,
{
    let mut cursor = target.open_cursor(range);
    let mut acc = seed;
    while cursor.advance().await? {
        let action = {
            let Some(current) = cursor.current.as_ref() else {
                break;
            };
            let mut handle = Step {
                key: &current.key,
                primary_key: &current.primary_key,
                value: &current.value,
                action: None,
            };
            acc = step(&mut handle, acc);
            handle.action
        };
        match action {
            Some(Action::Delete) => cursor.delete().await?,
            Some(Action::Update(value)) => cursor.update(value).await?,
            None => {}
        }
    }
    Ok(acc)
}

/// Default fold step: counts records without touching them.
pub fn count_step(_: &mut Step<'_>, n: u64) -> u64 {
    n + 1
}

pub async fn tally<W: Walk>(target: &W, range: Option<KeyRange>, seed: u64) -> Result<u64> {
    for_each(target, range, seed, count_step).await
}
