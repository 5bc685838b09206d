//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use url::Url;

use super::traits::RequestKey;
use crate::http::{Response, ResponseType};
use crate::shell::{Registration, WorkerState};

/// A response snapshot read back from a cache generation.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Summary of one cache generation.
#[derive(Debug, Clone)]
pub struct CacheInfo {
  pub name: String,
  pub entries: usize,
  pub bytes: u64,
  pub created_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Storage is shared by every caller; implementations must tolerate
/// concurrent reads and writes. Each entry write is atomic.
pub trait CacheStorage: Send + Sync {
  /// Names of all cache generations.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Create the named generation if it does not exist.
  fn open_cache(&self, name: &str) -> Result<()>;

  fn has_cache(&self, name: &str) -> Result<bool>;

  /// Delete a generation and all its entries. Returns false if it did not exist.
  fn delete_cache(&self, name: &str) -> Result<bool>;

  /// Look up a request in a generation.
  fn match_request(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store one entry, replacing any previous entry for the same key.
  ///
  /// Never creates the generation: returns false without writing when it
  /// does not exist, e.g. because an activation deleted it.
  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<bool>;

  /// Create the generation and store all entries in one transaction.
  fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// URLs stored in a generation, in insertion order.
  fn keys(&self, name: &str) -> Result<Vec<String>>;

  fn cache_info(&self) -> Result<Vec<CacheInfo>>;

  fn registrations(&self) -> Result<Vec<Registration>>;

  fn registration(&self, generation: &str) -> Result<Option<Registration>>;

  fn set_registration(&self, generation: &str, state: WorkerState) -> Result<()>;

  fn remove_registration(&self, generation: &str) -> Result<()>;

  /// Mark `generation` activated and every other registration redundant.
  fn promote(&self, generation: &str) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Database that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    Ok(crate::config::data_dir()?.join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per cache generation
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Request key -> response snapshot
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, key_hash),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);

-- Worker lifecycle per generation
CREATE TABLE IF NOT EXISTS registrations (
    generation TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO cache_entries
  (cache_name, key_hash, url, response_url, status, status_text, response_type, headers, body, cached_at)
  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))";

fn write_entry(conn: &Connection, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      UPSERT_ENTRY,
      params![
        name,
        key.cache_hash(),
        key.url(),
        response.url.as_str(),
        response.status,
        response.status_text,
        response.response_type.as_str(),
        headers,
        response.body.as_ref(),
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key.url(), name, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn open_cache(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    Ok(())
  }

  fn has_cache(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found = conn
      .query_row("SELECT 1 FROM caches WHERE name = ?", params![name], |_| Ok(()))
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE cache_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_request(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        "SELECT response_url, status, status_text, response_type, headers, body, cached_at
         FROM cache_entries WHERE cache_name = ? AND key_hash = ?",
        params![name, key.cache_hash()],
        |row| {
          Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u16>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Vec<u8>>(5)?,
            row.get::<_, String>(6)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query {} in {}: {}", key.url(), name, e))?;

    let Some((response_url, status, status_text, response_type, headers, body, cached_at)) = row
    else {
      return Ok(None);
    };

    let response = Response {
      url: Url::parse(&response_url)
        .map_err(|e| eyre!("Corrupt response URL '{}': {}", response_url, e))?,
      status,
      status_text,
      headers: serde_json::from_str(&headers)
        .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?,
      response_type: ResponseType::parse(&response_type)?,
      body: body.into(),
    };

    Ok(Some(CachedResponse {
      response,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let exists = tx
      .query_row("SELECT 1 FROM caches WHERE name = ?", params![name], |_| Ok(()))
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))?
      .is_some();
    if !exists {
      return Ok(false);
    }
    write_entry(&tx, name, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(true)
  }

  fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    for (key, response) in entries {
      write_entry(&tx, name, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn keys(&self, name: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT url FROM cache_entries WHERE cache_name = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![name], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys of {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn cache_info(&self) -> Result<Vec<CacheInfo>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT c.name, c.created_at, COUNT(e.key_hash), COALESCE(SUM(LENGTH(e.body)), 0)
         FROM caches c LEFT JOIN cache_entries e ON e.cache_name = c.name
         GROUP BY c.name ORDER BY c.created_at, c.name",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, i64>(2)?,
          row.get::<_, i64>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to summarize caches: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache summary: {}", e))?;

    rows
      .into_iter()
      .map(|(name, created_at, entries, bytes)| {
        Ok(CacheInfo {
          name,
          entries: entries as usize,
          bytes: bytes as u64,
          created_at: parse_datetime(&created_at)?,
        })
      })
      .collect()
  }

  fn registrations(&self) -> Result<Vec<Registration>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT generation, state, updated_at FROM registrations ORDER BY updated_at, generation")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list registrations: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read registration: {}", e))?;

    rows
      .into_iter()
      .map(|(generation, state, updated_at)| to_registration(generation, &state, &updated_at))
      .collect()
  }

  fn registration(&self, generation: &str) -> Result<Option<Registration>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        "SELECT state, updated_at FROM registrations WHERE generation = ?",
        params![generation],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query registration {}: {}", generation, e))?;

    row
      .map(|(state, updated_at)| to_registration(generation.to_string(), &state, &updated_at))
      .transpose()
  }

  fn set_registration(&self, generation: &str, state: WorkerState) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO registrations (generation, state, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![generation, state.as_str()],
      )
      .map_err(|e| eyre!("Failed to update registration {}: {}", generation, e))?;
    Ok(())
  }

  fn remove_registration(&self, generation: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM registrations WHERE generation = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to remove registration {}: {}", generation, e))?;
    Ok(())
  }

  fn promote(&self, generation: &str) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "UPDATE registrations SET state = ?, updated_at = datetime('now')
       WHERE state != ? AND generation != ?",
      params![
        WorkerState::Redundant.as_str(),
        WorkerState::Redundant.as_str(),
        generation
      ],
    )
    .map_err(|e| eyre!("Failed to retire previous workers: {}", e))?;
    tx.execute(
      "INSERT OR REPLACE INTO registrations (generation, state, updated_at)
       VALUES (?, ?, datetime('now'))",
      params![generation, WorkerState::Activated.as_str()],
    )
    .map_err(|e| eyre!("Failed to activate {}: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }
}

fn to_registration(generation: String, state: &str, updated_at: &str) -> Result<Registration> {
  Ok(Registration {
    generation,
    state: WorkerState::parse(state)?,
    updated_at: parse_datetime(updated_at)?,
  })
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes;

  fn key(path: &str) -> RequestKey {
    RequestKey::new(&Url::parse("https://devcard.example/").unwrap().join(path).unwrap())
  }

  fn response(body: &'static [u8]) -> Response {
    Response {
      url: Url::parse("https://devcard.example/").unwrap(),
      status: 200,
      status_text: "OK".to_string(),
      headers: vec![("content-type".to_string(), "text/css".to_string())],
      response_type: ResponseType::Basic,
      body: Bytes::from_static(body),
    }
  }

  #[test]
  fn test_put_and_match() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_cache("v1").unwrap();
    assert!(storage.put("v1", &key("/style.css"), &response(b"body{}")).unwrap());

    let hit = storage.match_request("v1", &key("/style.css")).unwrap().unwrap();
    assert_eq!(hit.response.body.as_ref(), b"body{}");
    assert_eq!(hit.response.header("Content-Type"), Some("text/css"));
    assert_eq!(hit.response.response_type, ResponseType::Basic);

    assert!(storage.match_request("v1", &key("/script.js")).unwrap().is_none());
    assert!(storage.match_request("v2", &key("/style.css")).unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_same_key() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_cache("v1").unwrap();
    storage.put("v1", &key("/script.js"), &response(b"old")).unwrap();
    storage.put("v1", &key("/script.js"), &response(b"new")).unwrap();

    let hit = storage.match_request("v1", &key("/script.js")).unwrap().unwrap();
    assert_eq!(hit.response.body.as_ref(), b"new");
    assert_eq!(storage.keys("v1").unwrap().len(), 1);
  }

  #[test]
  fn test_put_does_not_recreate_deleted_cache() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(!storage.put("v1", &key("/late.js"), &response(b"late")).unwrap());
    assert!(!storage.has_cache("v1").unwrap());

    storage.open_cache("v1").unwrap();
    storage.delete_cache("v1").unwrap();
    assert!(!storage.put("v1", &key("/late.js"), &response(b"late")).unwrap());
    assert!(storage.cache_names().unwrap().is_empty());
    assert!(storage.keys("v1").unwrap().is_empty());
  }

  #[test]
  fn test_delete_cache_removes_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put_all(
        "v1",
        &[
          (key("/"), response(b"shell")),
          (key("/index.html"), response(b"shell")),
        ],
      )
      .unwrap();
    storage.open_cache("v2").unwrap();

    assert_eq!(storage.cache_names().unwrap().len(), 2);
    assert!(storage.delete_cache("v1").unwrap());
    assert!(!storage.delete_cache("v1").unwrap());
    assert!(!storage.has_cache("v1").unwrap());
    assert!(storage.keys("v1").unwrap().is_empty());
    assert_eq!(storage.cache_names().unwrap(), vec!["v2".to_string()]);
  }

  #[test]
  fn test_cache_info_counts_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put_all("v1", &[(key("/a"), response(b"12")), (key("/b"), response(b"345"))])
      .unwrap();
    storage.open_cache("empty").unwrap();

    let info = storage.cache_info().unwrap();
    let v1 = info.iter().find(|c| c.name == "v1").unwrap();
    assert_eq!(v1.entries, 2);
    assert_eq!(v1.bytes, 5);
    let empty = info.iter().find(|c| c.name == "empty").unwrap();
    assert_eq!(empty.entries, 0);
  }

  #[test]
  fn test_promote_retires_previous() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.promote("v1").unwrap();
    storage.set_registration("v2", WorkerState::Installed).unwrap();
    storage.set_registration("v3", WorkerState::Installed).unwrap();
    storage.promote("v2").unwrap();

    let v3 = storage.registration("v3").unwrap().unwrap();
    assert_eq!(v3.state, WorkerState::Redundant);
    let v1 = storage.registration("v1").unwrap().unwrap();
    let v2 = storage.registration("v2").unwrap().unwrap();
    assert_eq!(v1.state, WorkerState::Redundant);
    assert_eq!(v2.state, WorkerState::Activated);

    storage.remove_registration("v1").unwrap();
    assert!(storage.registration("v1").unwrap().is_none());
    assert_eq!(storage.registrations().unwrap().len(), 2);
  }
}
