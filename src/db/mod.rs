//! SQLite helpers shared by the durable stores.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Open or create the database at `path`, creating parent directories.
pub fn open(path: &Path) -> Result<Connection> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
  }

  let conn = Connection::open(path)
    .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

  // Several stores open their own connection to the same file.
  conn
    .busy_timeout(std::time::Duration::from_secs(5))
    .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;
  conn
    .pragma_update(None, "journal_mode", "WAL")
    .map_err(|e| eyre!("Failed to enable WAL: {}", e))?;

  Ok(conn)
}

/// Open a private in-memory database.
#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
  Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))
}

/// Run a schema batch against a connection.
pub fn migrate(conn: &Connection, schema: &str) -> Result<()> {
  conn
    .execute_batch(schema)
    .map_err(|e| eyre!("Failed to run migrations: {}", e))
}

/// Directory holding all persisted state.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("catalog-sw"))
}

/// Parse a datetime string from SQLite format.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
