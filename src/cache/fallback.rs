//! Secondary durable fallback store.
//!
//! A flat key-value table, deliberately separate from the versioned stores:
//! version rotation never touches it, so the last known good reading set
//! survives a cache generation bump.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{SyncError, SyncResult};

/// Well-known key holding the last successfully normalized reading set.
pub const CACHED_SENSOR_DATA_KEY: &str = "cachedSensorData";

pub struct FallbackStore {
  conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS fallback_kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl FallbackStore {
  pub fn open(path: &Path) -> SyncResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::Storage(format!("failed to create fallback directory: {}", e)))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| SyncError::Storage(format!("failed to open fallback db: {}", e)))?;
    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> SyncResult<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| SyncError::Storage(format!("failed to open in-memory db: {}", e)))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> SyncResult<Self> {
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| SyncError::Storage(format!("failed to run fallback migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::Storage(format!("lock poisoned: {}", e)))
  }

  pub fn put(&self, key: &str, value: &[u8]) -> SyncResult<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO fallback_kv (key, value, stored_at)
       VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  pub fn get(&self, key: &str) -> SyncResult<Vec<u8>> {
    let conn = self.lock()?;
    let value = conn.query_row(
      "SELECT value FROM fallback_kv WHERE key = ?",
      params![key],
      |row| row.get::<_, Vec<u8>>(0),
    )?;
    Ok(value)
  }
}
