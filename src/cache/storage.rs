//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheEntry, CacheValue};

/// Trait for cache storage backends.
///
/// Implementations must never replace an entry with one carrying an older
/// `stored_at`.
pub trait CacheStorage: Send + Sync + 'static {
  /// Get the entry for `key`, if any.
  fn get<T: CacheValue>(&self, key: &str) -> Result<Option<CacheEntry<T>>>;

  /// Insert or replace an entry. Returns `false` when the stored entry is
  /// newer and was kept.
  fn put<T: CacheValue>(&self, entry: &CacheEntry<T>) -> Result<bool>;
}

/// In-process storage. Contents are lost when dropped.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, (Vec<u8>, DateTime<Utc>)>>> {
    self.entries.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn get<T: CacheValue>(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
    let entries = self.lock()?;
    match entries.get(key) {
      Some((data, stored_at)) => {
        let value = serde_json::from_slice(data)
          .map_err(|e| eyre!("Failed to deserialize cache entry '{}': {}", key, e))?;
        Ok(Some(CacheEntry {
          key: key.to_string(),
          value,
          stored_at: *stored_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put<T: CacheValue>(&self, entry: &CacheEntry<T>) -> Result<bool> {
    let data =
      serde_json::to_vec(&entry.value).map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?;
    let mut entries = self.lock()?;
    if let Some((_, existing)) = entries.get(&entry.key) {
      if *existing > entry.stored_at {
        return Ok(false);
      }
    }
    entries.insert(entry.key.clone(), (data, entry.stored_at));
    Ok(true)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A database that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tekconf").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
///
/// `stored_at` is fixed-width RFC 3339 in UTC, so text order is time order.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn get<T: CacheValue>(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
    let conn = self.conn()?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, stored_at FROM cache_entries WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry '{}': {}", key, e))?;

    match row {
      Some((data, stored_at)) => {
        let value = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cache entry '{}': {}", key, e))?;
        Ok(Some(CacheEntry {
          key: key.to_string(),
          value,
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put<T: CacheValue>(&self, entry: &CacheEntry<T>) -> Result<bool> {
    let data =
      serde_json::to_vec(&entry.value).map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?;
    let stored_at = format_datetime(entry.stored_at);

    let changed = self
      .conn()?
      .execute(
        "INSERT INTO cache_entries (key, data, stored_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET data = excluded.data, stored_at = excluded.stored_at
         WHERE excluded.stored_at >= cache_entries.stored_at",
        params![entry.key, data, stored_at],
      )
      .map_err(|e| eyre!("Failed to store cache entry '{}': {}", entry.key, e))?;

    Ok(changed > 0)
  }
}

fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
