//! Last known catalog, kept for browsing while offline.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::cache::Cacheable;
use crate::catalog::{CatalogSnapshot, Category, Download};
use crate::db;

/// A cached list of entities.
#[derive(Debug, Clone)]
pub struct CachedList<T> {
  /// Entities in the order they were stored
  pub entities: Vec<T>,
  /// When the list was stored
  pub cached_at: DateTime<Utc>,
}

/// SQLite-backed snapshot of catalog entities, one list per entity type.
pub struct SnapshotStore {
  conn: Mutex<Connection>,
}

const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshot_cache (
    entity_type TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    position INTEGER NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (entity_type, position)
);

CREATE TABLE IF NOT EXISTS snapshot_meta (
    entity_type TEXT PRIMARY KEY,
    item_count INTEGER NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SnapshotStore {
  pub fn open(path: &Path) -> Result<Self> {
    Self::with_connection(db::open(path)?)
  }

  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    Self::with_connection(db::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    db::migrate(&conn, SNAPSHOT_SCHEMA)?;
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

  /// Replace the stored list for `T` inside `tx`, recording when and how many.
  fn write_list<T: Cacheable>(tx: &Transaction<'_>, entities: &[T]) -> Result<()> {
    let entity_type = T::entity_type();

    tx.execute(
      "DELETE FROM snapshot_cache WHERE entity_type = ?",
      params![entity_type],
    )
    .map_err(|e| eyre!("Failed to delete old {} snapshot: {}", entity_type, e))?;

    for (position, entity) in entities.iter().enumerate() {
      let data =
        serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;
      tx.execute(
        "INSERT INTO snapshot_cache (entity_type, entity_key, position, data, cached_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![entity_type, entity.cache_key(), position as i64, data],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", entity_type, e))?;
    }

    tx.execute(
      "INSERT INTO snapshot_meta (entity_type, item_count, cached_at)
       VALUES (?, ?, datetime('now'))
       ON CONFLICT(entity_type) DO UPDATE SET
         item_count = excluded.item_count,
         cached_at = excluded.cached_at",
      params![entity_type, entities.len() as i64],
    )
    .map_err(|e| eyre!("Failed to store {} snapshot metadata: {}", entity_type, e))?;

    debug!(entity_type, count = entities.len(), "Snapshot list stored");
    Ok(())
  }

  /// Stored list for `T`, or `None` if it was never stored.
  pub fn get_list<T: Cacheable>(&self) -> Result<Option<CachedList<T>>> {
    let conn = self.lock()?;
    let entity_type = T::entity_type();

    // The metadata row, not the entity rows, marks a list as stored; an
    // empty list has one.
    let cached_at: Option<String> = conn
      .query_row(
        "SELECT cached_at FROM snapshot_meta WHERE entity_type = ?",
        params![entity_type],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read snapshot metadata: {}", e))?;

    let Some(cached_at) = cached_at else {
      return Ok(None);
    };
    let cached_at = db::parse_datetime(&cached_at)?;

    let mut stmt = conn
      .prepare("SELECT data FROM snapshot_cache WHERE entity_type = ? ORDER BY position")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<Vec<u8>> = stmt
      .query_map(params![entity_type], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query {} snapshot: {}", entity_type, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read {} snapshot: {}", entity_type, e))?;

    // An entity that no longer deserializes is dropped rather than failing the list.
    let entities = rows
      .iter()
      .filter_map(|data| match serde_json::from_slice(data) {
        Ok(entity) => Some(entity),
        Err(e) => {
          warn!(entity_type, error = %e, "Skipping unreadable snapshot entry");
          None
        }
      })
      .collect();

    Ok(Some(CachedList {
      entities,
      cached_at,
    }))
  }

  pub fn count<T: Cacheable>(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM snapshot_cache WHERE entity_type = ?",
        params![T::entity_type()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count snapshot entries: {}", e))?;
    Ok(count as usize)
  }

  /// Replace both lists at once; on failure the previous snapshot is kept whole.
  pub fn store_snapshot(&self, snapshot: &CatalogSnapshot) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    Self::write_list(&tx, &snapshot.categories)?;
    Self::write_list(&tx, &snapshot.downloads)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  /// Last stored catalog, or `None` if nothing has been stored yet.
  pub fn load_snapshot(&self) -> Result<Option<CatalogSnapshot>> {
    let categories = self.get_list::<Category>()?;
    let downloads = self.get_list::<Download>()?;

    if categories.is_none() && downloads.is_none() {
      return Ok(None);
    }
    if let Some(list) = &downloads {
      debug!(cached_at = %list.cached_at, count = list.entities.len(), "Loaded cached catalog");
    }

    Ok(Some(CatalogSnapshot {
      categories: categories.map(|c| c.entities).unwrap_or_default(),
      downloads: downloads.map(|d| d.entities).unwrap_or_default(),
    }))
  }
}
