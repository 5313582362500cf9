//! SQLite-backed queue of pending sync payloads.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{PendingBatch, SyncStore};

/// Queue connection wrapper.
pub struct SqliteSyncStore {
  conn: Mutex<Connection>,
}

impl SqliteSyncStore {
  /// Open or create the queue at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(SYNC_SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Queue a mutation for the next sync.
  pub fn enqueue(&self, payload: &Value) -> Result<i64> {
    let conn = self.lock()?;
    let data =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute("INSERT INTO pending_sync (payload) VALUES (?)", params![data])
      .map_err(|e| eyre!("Failed to queue payload: {}", e))?;

    Ok(conn.last_insert_rowid())
  }
}

const SYNC_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_sync (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

#[async_trait]
impl SyncStore for SqliteSyncStore {
  /// All queued payloads, oldest first, as one JSON array.
  async fn read_pending(&self) -> Result<Option<PendingBatch>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT id, payload FROM pending_sync ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
      .map_err(|e| eyre!("Failed to read pending payloads: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending payload: {}", e))?;

    let Some(through) = rows.last().map(|(id, _)| *id) else {
      return Ok(None);
    };

    let items = rows
      .iter()
      .map(|(id, data)| {
        serde_json::from_str(data).map_err(|e| eyre!("Corrupt pending payload {}: {}", id, e))
      })
      .collect::<Result<Vec<Value>>>()?;

    Ok(Some(PendingBatch {
      payload: Value::Array(items),
      through,
    }))
  }

  async fn clear_pending(&self, batch: &PendingBatch) -> Result<()> {
    self
      .lock()?
      .execute(
        "DELETE FROM pending_sync WHERE id <= ?",
        params![batch.through],
      )
      .map_err(|e| eyre!("Failed to clear pending payloads: {}", e))?;
    Ok(())
  }
}
