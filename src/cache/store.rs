//! Durable content cache: HTTP response snapshots in named partitions.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::db;
use crate::http::{CachedResponse, ResponseKind};

/// A cached response and where it lives.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub response: CachedResponse,
  pub partition: String,
  pub inserted_at: DateTime<Utc>,
}

/// SQLite-backed content cache.
pub struct ContentCache {
  conn: Mutex<Connection>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Partitions in creation order (rowid)
CREATE TABLE IF NOT EXISTS cache_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One response per request key per partition
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    kind TEXT NOT NULL,
    inserted_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(key_hash);
"#;

/// Raw row as read from `cache_entries`.
type EntryRow = (String, u16, String, Vec<u8>, String, String);

const SELECT_ENTRY: &str = "SELECT e.partition, e.status, e.headers, e.body, e.kind, e.inserted_at
   FROM cache_entries e";

impl ContentCache {
  /// Open the cache in the database file at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    Self::with_connection(db::open(path)?)
  }

  /// Open a cache that lives only as long as this value.
  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    Self::with_connection(db::open_in_memory()?)
  }

  /// Drop the entries table so every read and write fails.
  #[cfg(test)]
  pub(crate) fn break_storage(&self) {
    self
      .lock()
      .unwrap()
      .execute_batch("DROP TABLE cache_entries")
      .unwrap();
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    db::migrate(&conn, CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Look a request up in every partition, oldest partition first.
  pub fn get(&self, request_key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;
    let sql = format!(
      "{SELECT_ENTRY}
       INNER JOIN cache_partitions p ON p.name = e.partition
       WHERE e.key_hash = ?
       ORDER BY p.rowid
       LIMIT 1"
    );

    let row = conn
      .query_row(&sql, params![key_hash(request_key)], read_row)
      .optional()
      .map_err(|e| eyre!("Failed to query cache: {}", e))?;

    row.map(into_entry).transpose()
  }

  /// Look a request up in one partition.
  pub fn get_in(&self, partition: &str, request_key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;
    let sql = format!("{SELECT_ENTRY} WHERE e.partition = ? AND e.key_hash = ?");

    let row = conn
      .query_row(&sql, params![partition, key_hash(request_key)], read_row)
      .optional()
      .map_err(|e| eyre!("Failed to query cache: {}", e))?;

    row.map(into_entry).transpose()
  }

  /// Store a response, replacing any previous one for the same key in `partition`.
  pub fn put(&self, request_key: &str, response: &CachedResponse, partition: &str) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_partition(&tx, partition)?;
    insert_entry(&tx, partition, request_key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    debug!(partition, request_key, status = response.status, "Cached response");
    Ok(())
  }

  /// Store several responses in one transaction: either all land or none do.
  pub fn put_all(&self, partition: &str, entries: &[(String, CachedResponse)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_partition(&tx, partition)?;
    for (request_key, response) in entries {
      insert_entry(&tx, partition, request_key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  /// Names of all partitions in creation order.
  pub fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  /// Number of entries stored in a partition.
  pub fn entry_count(&self, partition: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;
    Ok(count as usize)
  }

  /// Drop a partition and everything in it.
  pub fn delete_partition(&self, name: &str) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    tx.execute("DELETE FROM cache_partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  /// Delete every partition except the current static and dynamic ones.
  ///
  /// Returns the partitions that were deleted.
  pub fn delete_partitions_except(
    &self,
    current_static: &str,
    current_dynamic: &str,
  ) -> Result<Vec<String>> {
    self.delete_partitions_matching(|name| name != current_static && name != current_dynamic)
  }

  /// Delete every partition for which `stale` returns true.
  ///
  /// Each partition is deleted on its own; a failure is logged and the
  /// remaining partitions are still processed.
  pub fn delete_partitions_matching<F>(&self, stale: F) -> Result<Vec<String>>
  where
    F: Fn(&str) -> bool,
  {
    let mut deleted = Vec::new();

    for name in self.partitions()?.into_iter().filter(|n| stale(n)) {
      match self.delete_partition(&name) {
        Ok(()) => {
          info!(partition = %name, "Deleted stale cache partition");
          deleted.push(name);
        }
        Err(e) => {
          warn!(partition = %name, error = %e, "Failed to delete cache partition");
        }
      }
    }

    Ok(deleted)
  }
}

/// Stable fixed-length key for a request.
fn key_hash(request_key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(request_key.as_bytes());
  hex::encode(hasher.finalize())
}

fn ensure_partition(conn: &Connection, partition: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  partition: &str,
  request_key: &str,
  response: &CachedResponse,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (partition, key_hash, request_key, status, headers, body, kind, inserted_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        key_hash(request_key),
        request_key,
        response.status,
        headers,
        response.body,
        response.kind.as_str(),
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

  Ok(())
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn into_entry(row: EntryRow) -> Result<CacheEntry> {
  let (partition, status, headers, body, kind, inserted_at) = row;

  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
  let kind =
    ResponseKind::parse(&kind).ok_or_else(|| eyre!("Unknown response kind '{}'", kind))?;

  Ok(CacheEntry {
    response: CachedResponse {
      status,
      headers,
      body,
      kind,
    },
    partition,
    inserted_at: db::parse_datetime(&inserted_at)?,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(body: &str) -> CachedResponse {
    CachedResponse::new(200, ResponseKind::Basic, body)
      .with_header("content-type", "text/css")
      .with_header("etag", "\"abc\"")
  }

  #[test]
  fn test_put_then_get_returns_identical_response() {
    let cache = ContentCache::in_memory().unwrap();
    let original = response("body { color: red }");
    cache
      .put("GET http://localhost:3000/css/style.css", &original, "catalog-static-v1")
      .unwrap();

    let entry = cache
      .get("GET http://localhost:3000/css/style.css")
      .unwrap()
      .unwrap();
    assert_eq!(entry.response, original);
    assert_eq!(entry.partition, "catalog-static-v1");
  }

  #[test]
  fn test_get_missing_key() {
    let cache = ContentCache::in_memory().unwrap();
    assert!(cache.get("GET http://localhost:3000/nope").unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_within_partition() {
    let cache = ContentCache::in_memory().unwrap();
    cache.put("k", &response("old"), "dyn").unwrap();
    cache.put("k", &response("new"), "dyn").unwrap();

    assert_eq!(cache.entry_count("dyn").unwrap(), 1);
    assert_eq!(cache.get_in("dyn", "k").unwrap().unwrap().response.body, b"new");
  }

  #[test]
  fn test_get_prefers_oldest_partition() {
    let cache = ContentCache::in_memory().unwrap();
    cache.put("k", &response("static"), "static").unwrap();
    cache.put("k", &response("dynamic"), "dynamic").unwrap();

    let entry = cache.get("k").unwrap().unwrap();
    assert_eq!(entry.partition, "static");
    assert_eq!(cache.get_in("dynamic", "k").unwrap().unwrap().response.body, b"dynamic");
  }

  #[test]
  fn test_delete_partitions_except_current_pair() {
    let cache = ContentCache::in_memory().unwrap();
    for partition in ["static-v1", "dynamic-v1", "static-v2", "dynamic-v2"] {
      cache.put("k", &response(partition), partition).unwrap();
    }

    let deleted = cache
      .delete_partitions_except("static-v2", "dynamic-v2")
      .unwrap();
    assert_eq!(deleted, vec!["static-v1", "dynamic-v1"]);
    assert_eq!(cache.partitions().unwrap(), vec!["static-v2", "dynamic-v2"]);
    assert_eq!(cache.entry_count("static-v1").unwrap(), 0);
    assert_eq!(cache.get("k").unwrap().unwrap().partition, "static-v2");
  }

  #[test]
  fn test_put_all_is_atomic_per_call() {
    let cache = ContentCache::in_memory().unwrap();
    let entries = vec![
      ("a".to_string(), response("a")),
      ("b".to_string(), response("b")),
    ];
    cache.put_all("static-v1", &entries).unwrap();
    assert_eq!(cache.entry_count("static-v1").unwrap(), 2);
  }

  #[test]
  fn test_file_backed_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    {
      let cache = ContentCache::open(&path).unwrap();
      cache.put("k", &response("persisted"), "static-v1").unwrap();
    }
    let cache = ContentCache::open(&path).unwrap();
    assert_eq!(cache.get("k").unwrap().unwrap().response.body, b"persisted");
  }
}
