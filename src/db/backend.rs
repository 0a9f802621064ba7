//! SQLite layout behind every database file, and the synchronous record
//! operations run on transaction workers.
//!
//! One file per database with five tables:
//! - kv_database: the database's name and schema version (single row)
//! - kv_stores: object stores with key path, key generator flag and counter
//! - kv_indexes: secondary indexes per store
//! - kv_records: store, encoded primary key, json value
//! - kv_index_entries: store, index, encoded index key, encoded primary key

use std::path::Path;
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

use super::key::{self, Key, KeyRange, MAX_GENERATED_KEY};
use crate::error::{Error, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const LAYOUT: &str = "
    CREATE TABLE IF NOT EXISTS kv_database (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        name TEXT NOT NULL,
        version INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS kv_stores (
        name TEXT PRIMARY KEY,
        key_path TEXT,
        auto_increment INTEGER NOT NULL,
        current_key INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS kv_indexes (
        store TEXT NOT NULL,
        name TEXT NOT NULL,
        key_path TEXT NOT NULL,
        is_unique INTEGER NOT NULL,
        PRIMARY KEY (store, name)
    );
    CREATE TABLE IF NOT EXISTS kv_records (
        store TEXT NOT NULL,
        key BLOB NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (store, key)
    );
    CREATE TABLE IF NOT EXISTS kv_index_entries (
        store TEXT NOT NULL,
        idx TEXT NOT NULL,
        key BLOB NOT NULL,
        primary_key BLOB NOT NULL,
        PRIMARY KEY (store, idx, key, primary_key)
    );
    CREATE INDEX IF NOT EXISTS kv_index_entries_by_primary
        ON kv_index_entries (store, primary_key);
";

#[derive(Debug, Clone)]
pub(crate) struct StoreInfo {
    pub name: String,
    pub key_path: Option<String>,
    pub auto_increment: bool,
    pub indexes: Vec<IndexInfo>,
}

#[derive(Debug, Clone)]
pub(crate) struct IndexInfo {
    pub name: String,
    pub key_path: String,
    pub unique: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Add,
    Put,
}

/// One step of a cursor walk: raw positions plus the record value.
pub(crate) struct CursorRow {
    pub key: Vec<u8>,
    pub primary_key: Vec<u8>,
    pub value: Value,
}

pub(crate) fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    Ok(conn)
}

/// Creates the layout if missing and returns the stored version (0 for a
/// database that was never opened before).
pub(crate) fn init(conn: &Connection, name: &str) -> Result<u32> {
    conn.execute_batch(LAYOUT)?;
    conn.execute(
        "INSERT OR IGNORE INTO kv_database (id, name, version) VALUES (1, ?1, 0)",
        params![name],
    )?;
    version(conn)
}

pub(crate) fn version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row("SELECT version FROM kv_database WHERE id = 1", [], |row| row.get(0))?)
}

pub(crate) fn set_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute("UPDATE kv_database SET version = ?1 WHERE id = 1", params![version])?;
    Ok(())
}

/// Stored version of a database whose layout already exists, without
/// creating anything. Safe inside a read transaction.
pub(crate) fn existing_version(conn: &Connection) -> Result<Option<u32>> {
    let has_layout: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'kv_database')",
        [],
        |row| row.get(0),
    )?;
    if !has_layout {
        return Ok(None);
    }
    Ok(identity(conn)?.map(|(_, version)| version))
}

/// Name and version recorded in a database file, if it is one of ours.
pub(crate) fn identity(conn: &Connection) -> Result<Option<(String, u32)>> {
    Ok(conn
        .query_row("SELECT name, version FROM kv_database WHERE id = 1", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?)
}

pub(crate) fn store_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM kv_stores ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

pub(crate) fn store_info(conn: &Connection, name: &str) -> Result<StoreInfo> {
    let store = conn
        .query_row(
            "SELECT key_path, auto_increment FROM kv_stores WHERE name = ?1",
            params![name],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, bool>(1)?)),
        )
        .optional()?;
    let Some((key_path, auto_increment)) = store else {
        return Err(Error::StoreNotFound(name.to_string()));
    };

    let mut stmt = conn.prepare(
        "SELECT name, key_path, is_unique FROM kv_indexes WHERE store = ?1 ORDER BY name",
    )?;
    let indexes = stmt
        .query_map(params![name], |row| {
            Ok(IndexInfo {
                name: row.get(0)?,
                key_path: row.get(1)?,
                unique: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(StoreInfo {
        name: name.to_string(),
        key_path,
        auto_increment,
        indexes,
    })
}

/// Runs one request under its own savepoint so a failed write leaves no
/// partial record or index state behind.
pub(crate) fn atomically<T>(conn: &Connection, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    conn.execute_batch("SAVEPOINT kv_request")?;
    match op(conn) {
        Ok(value) => {
            conn.execute_batch("RELEASE kv_request")?;
            Ok(value)
        }
        Err(err) => {
            conn.execute_batch("ROLLBACK TO kv_request; RELEASE kv_request")?;
            Err(err)
        }
    }
}

// schema changes, only reachable from a version change

pub(crate) fn create_store(
    conn: &Connection,
    name: &str,
    key_path: Option<&str>,
    auto_increment: bool,
) -> Result<()> {
    if auto_increment && key_path == Some("") {
        return Err(Error::Data("a key generator needs a non-empty key path".into()));
    }
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO kv_stores (name, key_path, auto_increment) VALUES (?1, ?2, ?3)",
        params![name, key_path, auto_increment],
    )?;
    if inserted == 0 {
        return Err(Error::Constraint(format!("object store '{name}' already exists")));
    }
    Ok(())
}

pub(crate) fn delete_store(conn: &Connection, name: &str) -> Result<()> {
    let removed = conn.execute("DELETE FROM kv_stores WHERE name = ?1", params![name])?;
    if removed == 0 {
        return Err(Error::StoreNotFound(name.to_string()));
    }
    conn.execute("DELETE FROM kv_indexes WHERE store = ?1", params![name])?;
    conn.execute("DELETE FROM kv_records WHERE store = ?1", params![name])?;
    conn.execute("DELETE FROM kv_index_entries WHERE store = ?1", params![name])?;
    Ok(())
}

pub(crate) fn create_index(
    conn: &Connection,
    store: &str,
    name: &str,
    key_path: &str,
    unique: bool,
) -> Result<()> {
    // validates the store exists
    store_info(conn, store)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO kv_indexes (store, name, key_path, is_unique) VALUES (?1, ?2, ?3, ?4)",
        params![store, name, key_path, unique],
    )?;
    if inserted == 0 {
        return Err(Error::Constraint(format!(
            "index '{name}' already exists on object store '{store}'"
        )));
    }

    // existing records join the new index
    let index = IndexInfo {
        name: name.to_string(),
        key_path: key_path.to_string(),
        unique,
    };
    let mut stmt = conn.prepare("SELECT key, value FROM kv_records WHERE store = ?1 ORDER BY key")?;
    let rows = stmt
        .query_map(params![store], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (primary, text) in rows {
        let value: Value = serde_json::from_str(&text)?;
        index_record(conn, store, &index, &value, &primary)?;
    }
    Ok(())
}

pub(crate) fn delete_index(conn: &Connection, store: &str, name: &str) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM kv_indexes WHERE store = ?1 AND name = ?2",
        params![store, name],
    )?;
    if removed == 0 {
        return Err(Error::IndexNotFound {
            store: store.to_string(),
            index: name.to_string(),
        });
    }
    conn.execute(
        "DELETE FROM kv_index_entries WHERE store = ?1 AND idx = ?2",
        params![store, name],
    )?;
    Ok(())
}

// writes

pub(crate) fn write_record(
    conn: &Connection,
    store: &StoreInfo,
    mut value: Value,
    explicit: Option<Key>,
    mode: WriteMode,
) -> Result<Key> {
    let key = match (&store.key_path, explicit) {
        (Some(_), Some(_)) => {
            return Err(Error::Data(format!(
                "object store '{}' uses inline keys; an explicit key is not allowed",
                store.name
            )))
        }
        (Some(path), None) => match key::extract(&value, path) {
            Some(found) => Key::from_value(found)?,
            None if store.auto_increment => {
                let generated = next_key(conn, &store.name)?;
                key::inject(&mut value, path, &generated)?;
                generated
            }
            None => {
                return Err(Error::Data(format!(
                    "record has no key at key path '{path}'"
                )))
            }
        },
        (None, Some(key)) => key,
        (None, None) if store.auto_increment => next_key(conn, &store.name)?,
        (None, None) => {
            return Err(Error::Data(format!(
                "object store '{}' uses out-of-line keys without a key generator; a key is required",
                store.name
            )))
        }
    };

    if store.auto_increment {
        if let Some(n) = key.as_number() {
            bump_generator(conn, &store.name, n)?;
        }
    }

    let primary = key.encode();
    if mode == WriteMode::Add && record_exists(conn, &store.name, &primary)? {
        return Err(Error::Constraint(format!(
            "a record with this key already exists in object store '{}'",
            store.name
        )));
    }

    conn.execute(
        "DELETE FROM kv_index_entries WHERE store = ?1 AND primary_key = ?2",
        params![store.name, primary],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO kv_records (store, key, value) VALUES (?1, ?2, ?3)",
        params![store.name, primary, serde_json::to_string(&value)?],
    )?;
    for index in &store.indexes {
        index_record(conn, &store.name, index, &value, &primary)?;
    }

    Ok(key)
}

/// Replaces the value stored under `primary`, keeping its key.
pub(crate) fn update_record(conn: &Connection, store: &StoreInfo, primary: &[u8], value: Value) -> Result<()> {
    if let Some(path) = &store.key_path {
        let current = Key::decode(primary)?;
        let found = key::extract(&value, path)
            .map(Key::from_value)
            .transpose()?;
        if found.as_ref() != Some(&current) {
            return Err(Error::Data(
                "updated record must keep the key it is stored under".into(),
            ));
        }
    }
    write_record(
        conn,
        store,
        value,
        if store.key_path.is_some() { None } else { Some(Key::decode(primary)?) },
        WriteMode::Put,
    )?;
    Ok(())
}

fn next_key(conn: &Connection, store: &str) -> Result<Key> {
    let current: i64 = conn.query_row(
        "SELECT current_key FROM kv_stores WHERE name = ?1",
        params![store],
        |row| row.get(0),
    )?;
    let next = current + 1;
    if next as f64 > MAX_GENERATED_KEY {
        return Err(Error::Constraint(format!("key generator of '{store}' is exhausted")));
    }
    Ok(Key::from(next))
}

fn bump_generator(conn: &Connection, store: &str, n: f64) -> Result<()> {
    let floor = n.floor().min(MAX_GENERATED_KEY);
    if floor < 1.0 {
        return Ok(());
    }
    conn.execute(
        "UPDATE kv_stores SET current_key = MAX(current_key, ?2) WHERE name = ?1",
        params![store, floor as i64],
    )?;
    Ok(())
}

fn record_exists(conn: &Connection, store: &str, primary: &[u8]) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM kv_records WHERE store = ?1 AND key = ?2)",
        params![store, primary],
        |row| row.get(0),
    )?)
}

fn index_record(conn: &Connection, store: &str, index: &IndexInfo, value: &Value, primary: &[u8]) -> Result<()> {
    // records without a valid key at the index path stay out of the index
    let Some(found) = key::extract(value, &index.key_path) else {
        return Ok(());
    };
    let Ok(index_key) = Key::from_value(found) else {
        return Ok(());
    };
    let encoded = index_key.encode();

    if index.unique {
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM kv_index_entries
             WHERE store = ?1 AND idx = ?2 AND key = ?3 AND primary_key != ?4)",
            params![store, index.name, encoded, primary],
            |row| row.get(0),
        )?;
        if taken {
            return Err(Error::Constraint(format!(
                "unique index '{}' on '{store}' already holds this key",
                index.name
            )));
        }
    }

    conn.execute(
        "INSERT OR IGNORE INTO kv_index_entries (store, idx, key, primary_key) VALUES (?1, ?2, ?3, ?4)",
        params![store, index.name, encoded, primary],
    )?;
    Ok(())
}

pub(crate) fn delete_record(conn: &Connection, store: &str, primary: &[u8]) -> Result<()> {
    conn.execute(
        "DELETE FROM kv_records WHERE store = ?1 AND key = ?2",
        params![store, primary],
    )?;
    conn.execute(
        "DELETE FROM kv_index_entries WHERE store = ?1 AND primary_key = ?2",
        params![store, primary],
    )?;
    Ok(())
}

pub(crate) fn delete_range(conn: &Connection, store: &str, range: &KeyRange) -> Result<u64> {
    let (filter, bounds) = range_filter("key", Some(range));
    let mut args = vec![SqlValue::Text(store.to_string())];
    args.extend(bounds);

    conn.execute(
        &format!(
            "DELETE FROM kv_index_entries WHERE store = ? AND primary_key IN
             (SELECT key FROM kv_records WHERE store = ?{filter})"
        ),
        params_from_iter(std::iter::once(&args[0]).chain(args.iter())),
    )?;
    let removed = conn.execute(
        &format!("DELETE FROM kv_records WHERE store = ?{filter}"),
        params_from_iter(args.iter()),
    )?;
    Ok(removed as u64)
}

pub(crate) fn clear(conn: &Connection, store: &str) -> Result<u64> {
    let removed = conn.execute("DELETE FROM kv_records WHERE store = ?1", params![store])?;
    conn.execute("DELETE FROM kv_index_entries WHERE store = ?1", params![store])?;
    Ok(removed as u64)
}

// reads

/// Builds ` AND col >= ? AND col < ?` style bounds for a range, with the
/// matching BLOB parameters.
fn range_filter(column: &str, range: Option<&KeyRange>) -> (String, Vec<SqlValue>) {
    let mut sql = String::new();
    let mut args = Vec::new();
    let Some(range) = range else {
        return (sql, args);
    };
    if let Some(lower) = range.lower() {
        let op = if range.lower_open() { ">" } else { ">=" };
        sql.push_str(&format!(" AND {column} {op} ?"));
        args.push(SqlValue::Blob(lower.encode()));
    }
    if let Some(upper) = range.upper() {
        let op = if range.upper_open() { "<" } else { "<=" };
        sql.push_str(&format!(" AND {column} {op} ?"));
        args.push(SqlValue::Blob(upper.encode()));
    }
    (sql, args)
}

fn parse_values(texts: Vec<String>) -> Result<Vec<Value>> {
    texts
        .iter()
        .map(|text| serde_json::from_str(text).map_err(Error::from))
        .collect()
}

pub(crate) fn get(conn: &Connection, store: &str, key: &Key) -> Result<Option<Value>> {
    let text: Option<String> = conn
        .query_row(
            "SELECT value FROM kv_records WHERE store = ?1 AND key = ?2",
            params![store, key.encode()],
            |row| row.get(0),
        )
        .optional()?;
    text.map(|t| serde_json::from_str(&t).map_err(Error::from))
        .transpose()
}

pub(crate) fn get_all(conn: &Connection, store: &str, range: Option<&KeyRange>) -> Result<Vec<Value>> {
    let (filter, bounds) = range_filter("key", range);
    let mut args = vec![SqlValue::Text(store.to_string())];
    args.extend(bounds);

    let mut stmt = conn.prepare(&format!(
        "SELECT value FROM kv_records WHERE store = ?{filter} ORDER BY key"
    ))?;
    let texts = stmt
        .query_map(params_from_iter(args.iter()), |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    parse_values(texts)
}

pub(crate) fn count(conn: &Connection, store: &str, range: Option<&KeyRange>) -> Result<u64> {
    let (filter, bounds) = range_filter("key", range);
    let mut args = vec![SqlValue::Text(store.to_string())];
    args.extend(bounds);

    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM kv_records WHERE store = ?{filter}"),
        params_from_iter(args.iter()),
        |row| row.get(0),
    )?;
    Ok(n.max(0) as u64)
}

pub(crate) fn index_get_all(
    conn: &Connection,
    store: &str,
    index: &str,
    range: Option<&KeyRange>,
) -> Result<Vec<Value>> {
    let (filter, bounds) = range_filter("e.key", range);
    let mut args = vec![
        SqlValue::Text(store.to_string()),
        SqlValue::Text(index.to_string()),
    ];
    args.extend(bounds);

    let mut stmt = conn.prepare(&format!(
        "SELECT r.value FROM kv_index_entries e
         JOIN kv_records r ON r.store = e.store AND r.key = e.primary_key
         WHERE e.store = ? AND e.idx = ?{filter}
         ORDER BY e.key, e.primary_key"
    ))?;
    let texts = stmt
        .query_map(params_from_iter(args.iter()), |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    parse_values(texts)
}

pub(crate) fn index_count(
    conn: &Connection,
    store: &str,
    index: &str,
    range: Option<&KeyRange>,
) -> Result<u64> {
    let (filter, bounds) = range_filter("key", range);
    let mut args = vec![
        SqlValue::Text(store.to_string()),
        SqlValue::Text(index.to_string()),
    ];
    args.extend(bounds);

    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM kv_index_entries WHERE store = ? AND idx = ?{filter}"),
        params_from_iter(args.iter()),
        |row| row.get(0),
    )?;
    Ok(n.max(0) as u64)
}

/// Next record of a store walk strictly after `after`.
pub(crate) fn next_store_row(
    conn: &Connection,
    store: &str,
    range: Option<&KeyRange>,
    after: Option<&[u8]>,
) -> Result<Option<CursorRow>> {
    let (filter, bounds) = range_filter("key", range);
    let mut sql = String::from("SELECT key, value FROM kv_records WHERE store = ?");
    let mut args = vec![SqlValue::Text(store.to_string())];
    if let Some(after) = after {
        sql.push_str(" AND key > ?");
        args.push(SqlValue::Blob(after.to_vec()));
    }
    sql.push_str(&filter);
    sql.push_str(" ORDER BY key LIMIT 1");
    args.extend(bounds);

    let row = conn
        .query_row(&sql, params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?))
        })
        .optional()?;
    row.map(|(key, text)| -> Result<CursorRow> {
        Ok(CursorRow {
            primary_key: key.clone(),
            key,
            value: serde_json::from_str(&text)?,
        })
    })
    .transpose()
}

/// Next record of an index walk strictly after `(index key, primary key)`.
pub(crate) fn next_index_row(
    conn: &Connection,
    store: &str,
    index: &str,
    range: Option<&KeyRange>,
    after: Option<(&[u8], &[u8])>,
) -> Result<Option<CursorRow>> {
    let (filter, bounds) = range_filter("e.key", range);
    let mut sql = String::from(
        "SELECT e.key, e.primary_key, r.value FROM kv_index_entries e
         JOIN kv_records r ON r.store = e.store AND r.key = e.primary_key
         WHERE e.store = ? AND e.idx = ?",
    );
    let mut args = vec![
        SqlValue::Text(store.to_string()),
        SqlValue::Text(index.to_string()),
    ];
    if let Some((key, primary)) = after {
        sql.push_str(" AND (e.key, e.primary_key) > (?, ?)");
        args.push(SqlValue::Blob(key.to_vec()));
        args.push(SqlValue::Blob(primary.to_vec()));
    }
    sql.push_str(&filter);
    sql.push_str(" ORDER BY e.key, e.primary_key LIMIT 1");
    args.extend(bounds);

    let row = conn
        .query_row(&sql, params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .optional()?;
    row.map(|(key, primary_key, text)| -> Result<CursorRow> {
        Ok(CursorRow {
            key,
            primary_key,
            value: serde_json::from_str(&text)?,
        })
    })
    .transpose()
}
