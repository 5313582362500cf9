//! SQLite implementation of the partitioned cache storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStorage, CachedEntry, RequestKey};
use crate::net::Response;

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the cache database at `path`.
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

  /// Create a storage that lives only as long as this value.
  pub fn in_memory() -> Result<Self> {
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

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One response snapshot per (partition, request)
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    written INTEGER NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(entry_key, written);
"#;

const INSERT_PARTITION: &str = "INSERT OR IGNORE INTO partitions (name) VALUES (?)";

const INSERT_ENTRY: &str = "INSERT OR REPLACE INTO entries
  (partition, entry_key, method, url, status, status_text, headers, body, written, cached_at)
  VALUES (?, ?, ?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(written), 0) + 1 FROM entries), datetime('now'))";

const SELECT_ENTRY: &str =
  "SELECT partition, method, url, status, status_text, headers, body, cached_at FROM entries";

fn insert_entry(
  conn: &Connection,
  partition: &str,
  key: &RequestKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      INSERT_ENTRY,
      params![
        partition,
        key.cache_hash(),
        key.method,
        key.url,
        response.status,
        response.status_text,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {} in {}: {}", key.url, partition, e))?;

  Ok(())
}

/// Raw columns of an entry row, decoded outside the rusqlite closure.
struct EntryRow {
  partition: String,
  method: String,
  url: String,
  status: u16,
  status_text: String,
  headers: String,
  body: Vec<u8>,
  cached_at: String,
}

impl EntryRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      partition: row.get(0)?,
      method: row.get(1)?,
      url: row.get(2)?,
      status: row.get(3)?,
      status_text: row.get(4)?,
      headers: row.get(5)?,
      body: row.get(6)?,
      cached_at: row.get(7)?,
    })
  }

  fn into_entry(self) -> Result<CachedEntry> {
    let headers: Vec<(String, String)> = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", self.url, e))?;

    Ok(CachedEntry {
      key: RequestKey::new(&self.method, &self.url),
      response: Response {
        status: self.status,
        status_text: self.status_text,
        headers,
        body: self.body,
      },
      cached_at: parse_datetime(&self.cached_at)?,
      partition: self.partition,
    })
  }
}

impl CacheStorage for SqliteStorage {
  fn create_partition(&self, name: &str) -> Result<()> {
    self
      .lock()?
      .execute(INSERT_PARTITION, params![name])
      .map_err(|e| eyre!("Failed to create partition {}: {}", name, e))?;

    Ok(())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.put_all(partition, &[(key.clone(), response.clone())])
  }

  fn put_all(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(INSERT_PARTITION, params![partition])
      .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;
    for (key, response) in entries {
      insert_entry(&tx, partition, key, response)?;
    }

    // Dropping the transaction on any error above rolls the batch back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        &format!("{} WHERE partition = ? AND entry_key = ?", SELECT_ENTRY),
        params![partition, key.cache_hash()],
        EntryRow::from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key.url, partition, e))?;

    row.map(EntryRow::into_entry).transpose()
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        &format!(
          "{} WHERE entry_key = ? ORDER BY written DESC LIMIT 1",
          SELECT_ENTRY
        ),
        params![key.cache_hash()],
        EntryRow::from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key.url, e))?;

    row.map(EntryRow::into_entry).transpose()
  }

  fn keys(&self, partition: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT method, url FROM entries WHERE partition = ? ORDER BY written")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![partition], |row| {
        let method: String = row.get(0)?;
        let url: String = row.get(1)?;
        Ok(RequestKey::new(&method, &url))
      })
      .map_err(|e| eyre!("Failed to list keys of {}: {}", partition, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }
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

  fn key(url: &str) -> RequestKey {
    RequestKey::new("GET", url)
  }

  fn response(body: &str) -> Response {
    Response::new(200, "OK", body).with_header("Content-Type", "text/html")
  }

  #[test]
  fn test_put_then_get_roundtrips_snapshot() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage
      .put("static", &key("http://a/index.html"), &response("<html>"))
      .unwrap();

    let entry = storage
      .get("static", &key("http://a/index.html"))
      .unwrap()
      .unwrap();
    assert_eq!(entry.partition, "static");
    assert_eq!(entry.response.text(), "<html>");
    assert_eq!(entry.response.header("content-type"), Some("text/html"));
    assert!(storage.get("dynamic", &key("http://a/index.html")).unwrap().is_none());
  }

  #[test]
  fn test_put_replaces_existing_key() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.put("p", &key("http://a/x"), &response("one")).unwrap();
    storage.put("p", &key("http://a/x"), &response("two")).unwrap();

    assert_eq!(storage.keys("p").unwrap().len(), 1);
    let entry = storage.get("p", &key("http://a/x")).unwrap().unwrap();
    assert_eq!(entry.response.text(), "two");
  }

  #[test]
  fn test_match_any_prefers_most_recent_write() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.put("a", &key("http://a/x"), &response("first")).unwrap();
    storage.put("b", &key("http://a/x"), &response("second")).unwrap();

    let entry = storage.match_any(&key("http://a/x")).unwrap().unwrap();
    assert_eq!(entry.partition, "b");

    storage.put("a", &key("http://a/x"), &response("third")).unwrap();
    let entry = storage.match_any(&key("http://a/x")).unwrap().unwrap();
    assert_eq!(entry.partition, "a");
    assert_eq!(entry.response.text(), "third");
  }

  #[test]
  fn test_partitions_created_lazily_and_deleted() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.create_partition("empty").unwrap();
    storage.put("lazy", &key("http://a/x"), &response("x")).unwrap();

    assert_eq!(storage.partition_names().unwrap(), vec!["empty", "lazy"]);
    assert!(storage.delete_partition("lazy").unwrap());
    assert!(!storage.delete_partition("lazy").unwrap());
    assert!(storage.match_any(&key("http://a/x")).unwrap().is_none());
    assert_eq!(storage.partition_names().unwrap(), vec!["empty"]);
  }

  #[test]
  fn test_put_all_is_one_batch() {
    let storage = SqliteStorage::in_memory().unwrap();
    let batch = vec![
      (key("http://a/1"), response("1")),
      (key("http://a/2"), response("2")),
    ];
    storage.put_all("static", &batch).unwrap();

    let urls: Vec<String> = storage
      .keys("static")
      .unwrap()
      .into_iter()
      .map(|k| k.url)
      .collect();
    assert_eq!(urls, vec!["http://a/1", "http://a/2"]);
  }
}
