//! Versioned cache store backed by SQLite.
//!
//! Each named store (`sensor-data-cache-<version>`, `static-assets-<version>`,
//! `images-<version>`) maps URL-shaped keys to serialized payloads. At most
//! one version is active; [`VersionedStore::rotate`] deletes every store not
//! tagged with the new version in a single transaction, so concurrent readers
//! observe either the old generation or the new one, never a torn entry.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{SyncError, SyncResult};

/// The named stores one cache generation consists of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum StoreKind {
  SensorData,
  StaticAssets,
  Images,
}

impl StoreKind {
  fn prefix(&self) -> &'static str {
    match self {
      StoreKind::SensorData => "sensor-data-cache",
      StoreKind::StaticAssets => "static-assets",
      StoreKind::Images => "images",
    }
  }

  /// Full store name for a given version tag.
  pub fn store_name(&self, version: &str) -> String {
    format!("{}-{}", self.prefix(), version)
  }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    key TEXT NOT NULL,
    payload BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_store ON cache_entries(store);

CREATE TABLE IF NOT EXISTS active_version (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    version TEXT NOT NULL
);
"#;

/// SQLite-backed versioned cache store.
///
/// A single connection behind a mutex keeps every mutation atomic with
/// respect to reads; rotation additionally runs in one transaction.
pub struct VersionedStore {
  conn: Mutex<Connection>,
  /// The generation this process serves. Reads and writes target stores
  /// tagged with it; rotation purges everything else.
  version: String,
  /// Entry bound for non-sensor stores, trimmed oldest-first on insert.
  asset_limit: usize,
}

impl VersionedStore {
  /// Open (or create) the store at the given path.
  pub fn open(path: &Path, version: &str, asset_limit: usize) -> SyncResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::Storage(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| SyncError::Storage(format!("failed to open cache db: {}", e)))?;
    Self::with_connection(conn, version, asset_limit)
  }

  /// In-memory store, used by tests.
  #[cfg(test)]
  pub fn open_in_memory(version: &str, asset_limit: usize) -> SyncResult<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| SyncError::Storage(format!("failed to open in-memory db: {}", e)))?;
    Self::with_connection(conn, version, asset_limit)
  }

  fn with_connection(conn: Connection, version: &str, asset_limit: usize) -> SyncResult<Self> {
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| SyncError::Storage(format!("failed to run cache migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
      version: version.to_string(),
      asset_limit,
    })
  }

  fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::Storage(format!("lock poisoned: {}", e)))
  }

  /// The version tag this store serves.
  pub fn version(&self) -> &str {
    &self.version
  }

  /// Idempotent overwrite of a sensor-data entry.
  pub fn put(&self, key: &str, payload: &[u8]) -> SyncResult<()> {
    let conn = self.lock()?;
    let store = StoreKind::SensorData.store_name(&self.version);

    conn.execute(
      "INSERT OR REPLACE INTO cache_entries (store, key, payload, stored_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![store, key, payload],
    )?;

    Ok(())
  }

  /// Insert into a non-sensor store, trimming oldest entries beyond the
  /// configured bound. Sensor data never expires by count; it is only
  /// replaced by rotation or overwritten in place.
  #[allow(dead_code)]
  pub fn put_bounded(&self, kind: StoreKind, key: &str, payload: &[u8]) -> SyncResult<()> {
    let conn = self.lock()?;
    let store = kind.store_name(&self.version);

    conn.execute(
      "INSERT OR REPLACE INTO cache_entries (store, key, payload, stored_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![store, key, payload],
    )?;

    conn.execute(
      "DELETE FROM cache_entries WHERE store = ?1 AND key NOT IN (
         SELECT key FROM cache_entries WHERE store = ?1
         ORDER BY stored_at DESC, key DESC LIMIT ?2
       )",
      params![store, self.asset_limit],
    )?;

    Ok(())
  }

  /// Exact-key lookup in the sensor-data store.
  pub fn get(&self, key: &str) -> SyncResult<Vec<u8>> {
    let conn = self.lock()?;
    let store = StoreKind::SensorData.store_name(&self.version);

    let payload = conn.query_row(
      "SELECT payload FROM cache_entries WHERE store = ? AND key = ?",
      params![store, key],
      |row| row.get::<_, Vec<u8>>(0),
    )?;

    Ok(payload)
  }

  /// Return the first stored entry whose key contains the given substring.
  ///
  /// Keys are URL-shaped and the base URL varies between environments while
  /// the logical path suffix is stable, so an exact lookup can miss entries
  /// written under a different base.
  pub fn match_fuzzy(&self, substring: &str) -> SyncResult<(String, Vec<u8>)> {
    let conn = self.lock()?;
    let store = StoreKind::SensorData.store_name(&self.version);

    let row = conn.query_row(
      "SELECT key, payload FROM cache_entries
       WHERE store = ? AND instr(key, ?) > 0
       ORDER BY stored_at DESC, key LIMIT 1",
      params![store, substring],
      |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
    )?;

    Ok(row)
  }

  /// All keys currently stored in the sensor-data store.
  pub fn keys(&self) -> SyncResult<Vec<String>> {
    let conn = self.lock()?;
    let store = StoreKind::SensorData.store_name(&self.version);

    let mut stmt = conn.prepare("SELECT key FROM cache_entries WHERE store = ? ORDER BY key")?;
    let keys = stmt
      .query_map(params![store], |row| row.get::<_, String>(0))?
      .collect::<Result<Vec<_>, _>>()?;

    Ok(keys)
  }

  /// Names of every store present, across all versions.
  pub fn store_names(&self) -> SyncResult<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn.prepare("SELECT DISTINCT store FROM cache_entries ORDER BY store")?;
    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))?
      .collect::<Result<Vec<_>, _>>()?;

    Ok(names)
  }

  /// Delete every store not tagged with `new_version`, then mark it active.
  ///
  /// Runs in a single transaction while holding the connection, so no reader
  /// observes a partially deleted generation.
  pub fn rotate(&self, new_version: &str) -> SyncResult<()> {
    let conn = self.lock()?;

    conn.execute("BEGIN IMMEDIATE TRANSACTION", [])?;

    let result = (|| -> SyncResult<()> {
      conn.execute(
        "DELETE FROM cache_entries WHERE store NOT LIKE '%-' || ?",
        params![new_version],
      )?;
      conn.execute(
        "INSERT OR REPLACE INTO active_version (id, version) VALUES (0, ?)",
        params![new_version],
      )?;
      Ok(())
    })();

    match result {
      Ok(()) => {
        conn.execute("COMMIT", [])?;
        Ok(())
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  #[cfg(test)]
  fn entry_count(&self, kind: StoreKind) -> SyncResult<usize> {
    let conn = self.lock()?;
    let store = kind.store_name(&self.version);
    let count: usize = conn.query_row(
      "SELECT COUNT(*) FROM cache_entries WHERE store = ?",
      params![store],
      |row| row.get(0),
    )?;
    Ok(count)
  }

  /// The version recorded by the last completed rotation, if any.
  pub fn active_version(&self) -> SyncResult<Option<String>> {
    let conn = self.lock()?;

    let version = conn
      .query_row("SELECT version FROM active_version WHERE id = 0", [], |row| {
        row.get::<_, String>(0)
      });

    match version {
      Ok(v) => Ok(Some(v)),
      Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
      Err(e) => Err(e.into()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store(version: &str) -> VersionedStore {
    VersionedStore::open_in_memory(version, 4).unwrap()
  }

  #[test]
  fn put_is_an_idempotent_overwrite() {
    let s = store("v1");
    s.put("https://host/api/data/", b"first").unwrap();
    s.put("https://host/api/data/", b"second").unwrap();

    assert_eq!(s.get("https://host/api/data/").unwrap(), b"second");
    assert_eq!(s.keys().unwrap().len(), 1);
  }

  #[test]
  fn get_misses_with_not_found() {
    let s = store("v1");
    assert!(matches!(
      s.get("https://host/api/data/"),
      Err(SyncError::NotFound)
    ));
  }

  #[test]
  fn fuzzy_match_finds_sibling_keys() {
    let s = store("v1");
    s.put("https://host/api/data/?x=1", b"payload").unwrap();

    let (key, payload) = s.match_fuzzy("/api/data/").unwrap();
    assert_eq!(key, "https://host/api/data/?x=1");
    assert_eq!(payload, b"payload");

    assert!(matches!(
      s.match_fuzzy("/api/other/"),
      Err(SyncError::NotFound)
    ));
  }

  #[test]
  fn rotate_purges_every_old_generation_store() {
    let s = store("v1");
    s.put("https://host/api/data/", b"sensor").unwrap();
    s.put_bounded(StoreKind::StaticAssets, "https://host/app.js", b"js")
      .unwrap();

    // Simulate a deploy: same database, new generation.
    s.rotate("v2").unwrap();

    let names = s.store_names().unwrap();
    assert!(
      names.iter().all(|n| n.ends_with("-v2")),
      "v1 stores remain: {:?}",
      names
    );

    // Any get against a v1-only key now misses.
    assert!(matches!(
      s.get("https://host/api/data/"),
      Err(SyncError::NotFound)
    ));
    assert_eq!(s.active_version().unwrap().as_deref(), Some("v2"));
  }

  #[test]
  fn rotate_keeps_the_new_generation_intact() {
    let s = store("v2");
    s.put("https://host/api/data/", b"fresh").unwrap();
    s.rotate("v2").unwrap();

    assert_eq!(s.get("https://host/api/data/").unwrap(), b"fresh");
  }

  #[test]
  fn bounded_store_trims_to_the_configured_limit() {
    let s = store("v1");
    for i in 0..6 {
      s.put_bounded(
        StoreKind::Images,
        &format!("https://host/img/{}.png", i),
        b"img",
      )
      .unwrap();
    }

    assert_eq!(s.entry_count(StoreKind::Images).unwrap(), 4);

    // Re-inserting an existing key must not grow the store.
    s.put_bounded(StoreKind::Images, "https://host/img/5.png", b"img")
      .unwrap();
    assert_eq!(s.entry_count(StoreKind::Images).unwrap(), 4);
  }
}
