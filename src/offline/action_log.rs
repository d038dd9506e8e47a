//! Durable queue of actions taken while offline.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::db;

/// Kind of user action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionType {
  Download,
  Search,
  Upload,
  Update,
  Delete,
  /// Any other action, kept verbatim
  Other(String),
}

impl ActionType {
  pub fn as_str(&self) -> &str {
    match self {
      Self::Download => "download",
      Self::Search => "search",
      Self::Upload => "upload",
      Self::Update => "update",
      Self::Delete => "delete",
      Self::Other(s) => s,
    }
  }
}

impl From<&str> for ActionType {
  fn from(s: &str) -> Self {
    match s.trim().to_lowercase().as_str() {
      "download" => Self::Download,
      "search" => Self::Search,
      "upload" => Self::Upload,
      "update" => Self::Update,
      "delete" => Self::Delete,
      other => Self::Other(other.to_string()),
    }
  }
}

impl fmt::Display for ActionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A queued action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineAction {
  pub id: i64,
  pub action_type: ActionType,
  pub message: String,
  pub timestamp: DateTime<Utc>,
  pub synced: bool,
}

/// SQLite-backed action log, ordered by autoincrement id.
pub struct ActionLog {
  conn: Mutex<Connection>,
}

const ACTION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS offline_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action_type TEXT NOT NULL,
    message TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_offline_actions_synced ON offline_actions(synced, id);
"#;

type ActionRow = (i64, String, String, String, bool);

impl ActionLog {
  pub fn open(path: &Path) -> Result<Self> {
    Self::with_connection(db::open(path)?)
  }

  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    Self::with_connection(db::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    db::migrate(&conn, ACTION_SCHEMA)?;
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

  /// Queue an action. Never touches the network.
  pub fn append(&self, action_type: ActionType, message: &str) -> Result<OfflineAction> {
    let conn = self.lock()?;
    let timestamp = Utc::now();

    conn
      .execute(
        "INSERT INTO offline_actions (action_type, message, timestamp, synced) VALUES (?, ?, ?, 0)",
        params![action_type.as_str(), message, timestamp.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store offline action: {}", e))?;

    let action = OfflineAction {
      id: conn.last_insert_rowid(),
      action_type,
      message: message.to_string(),
      timestamp,
      synced: false,
    };
    debug!(id = action.id, action_type = %action.action_type, "Offline action stored");
    Ok(action)
  }

  /// Unsynced actions in insertion order.
  pub fn list_unsynced(&self) -> Result<Vec<OfflineAction>> {
    self.query(
      "SELECT id, action_type, message, timestamp, synced FROM offline_actions
       WHERE synced = 0 ORDER BY id",
    )
  }

  /// Every retained action in insertion order.
  pub fn list_all(&self) -> Result<Vec<OfflineAction>> {
    self.query("SELECT id, action_type, message, timestamp, synced FROM offline_actions ORDER BY id")
  }

  pub fn mark_synced(&self, id: i64) -> Result<()> {
    let conn = self.lock()?;
    let updated = conn
      .execute(
        "UPDATE offline_actions SET synced = 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to mark action {} synced: {}", id, e))?;

    if updated == 0 {
      return Err(eyre!("No offline action with id {}", id));
    }
    Ok(())
  }

  pub fn pending_count(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM offline_actions WHERE synced = 0",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count offline actions: {}", e))?;
    Ok(count as usize)
  }

  /// Delete synced actions except the `keep` most recent ones.
  ///
  /// Unsynced actions are never touched. Returns the number deleted.
  pub fn prune_synced(&self, keep: usize) -> Result<usize> {
    let conn = self.lock()?;
    let deleted = conn
      .execute(
        "DELETE FROM offline_actions
         WHERE synced = 1 AND id NOT IN (
           SELECT id FROM offline_actions WHERE synced = 1 ORDER BY id DESC LIMIT ?
         )",
        params![keep as i64],
      )
      .map_err(|e| eyre!("Failed to prune offline actions: {}", e))?;
    Ok(deleted)
  }

  /// Delete every action, synced or not. Returns the number deleted.
  pub fn clear(&self) -> Result<usize> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM offline_actions", [])
      .map_err(|e| eyre!("Failed to clear offline actions: {}", e))
  }

  fn query(&self, sql: &str) -> Result<Vec<OfflineAction>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| -> rusqlite::Result<ActionRow> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .map_err(|e| eyre!("Failed to query offline actions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read offline action: {}", e))?;

    rows
      .into_iter()
      .map(|(id, action_type, message, timestamp, synced)| {
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
          .map_err(|e| eyre!("Bad timestamp on action {}: {}", id, e))?
          .with_timezone(&Utc);
        Ok(OfflineAction {
          id,
          action_type: ActionType::from(action_type.as_str()),
          message,
          timestamp,
          synced,
        })
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_action_type_round_trip() {
    assert_eq!(ActionType::from("Download"), ActionType::Download);
    assert_eq!(ActionType::from("search"), ActionType::Search);
    assert_eq!(
      ActionType::from("favorite"),
      ActionType::Other("favorite".to_string())
    );
    assert_eq!(ActionType::Other("favorite".to_string()).to_string(), "favorite");
  }

  #[test]
  fn test_append_assigns_increasing_ids() {
    let log = ActionLog::in_memory().unwrap();
    let a = log.append(ActionType::Download, "VLC").unwrap();
    let b = log.append(ActionType::Search, "editor").unwrap();
    assert!(b.id > a.id);
    assert!(!a.synced);
  }

  #[test]
  fn test_list_unsynced_in_insertion_order() {
    let log = ActionLog::in_memory().unwrap();
    let first = log.append(ActionType::Download, "one").unwrap();
    log.append(ActionType::Download, "two").unwrap();
    log.append(ActionType::Search, "three").unwrap();
    log.mark_synced(first.id).unwrap();

    let pending: Vec<String> = log
      .list_unsynced()
      .unwrap()
      .into_iter()
      .map(|a| a.message)
      .collect();
    assert_eq!(pending, vec!["two", "three"]);
    assert_eq!(log.pending_count().unwrap(), 2);
    assert!(log.list_all().unwrap()[0].synced);
  }

  #[test]
  fn test_mark_synced_unknown_id() {
    let log = ActionLog::in_memory().unwrap();
    assert!(log.mark_synced(42).is_err());
  }

  #[test]
  fn test_prune_keeps_recent_synced_and_all_unsynced() {
    let log = ActionLog::in_memory().unwrap();
    let mut ids = Vec::new();
    for i in 0..5 {
      ids.push(log.append(ActionType::Download, &format!("a{}", i)).unwrap().id);
    }
    for id in &ids[..4] {
      log.mark_synced(*id).unwrap();
    }

    assert_eq!(log.prune_synced(1).unwrap(), 3);
    let remaining: Vec<(String, bool)> = log
      .list_all()
      .unwrap()
      .into_iter()
      .map(|a| (a.message, a.synced))
      .collect();
    assert_eq!(
      remaining,
      vec![("a3".to_string(), true), ("a4".to_string(), false)]
    );
  }

  #[test]
  fn test_ids_not_reused_after_clear() {
    let log = ActionLog::in_memory().unwrap();
    let before = log.append(ActionType::Download, "x").unwrap();
    assert_eq!(log.clear().unwrap(), 1);
    let after = log.append(ActionType::Download, "y").unwrap();
    assert!(after.id > before.id);
  }
}
