use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// String-keyed durable storage.
pub trait KvStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Write several keys. Implementations that can should make this atomic.
    fn put_many(&mut self, pairs: &[(&str, &str)]) -> Result<(), StoreError> {
        for (k, v) in pairs {
            self.put(k, v)?;
        }
        Ok(())
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { conn })
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
"#,
    )
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

const UPSERT_KV: &str = r#"
INSERT INTO kv (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value=excluded.value,
  updated_at=excluded.updated_at
"#;

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(row.get(0)?));
        }
        Ok(None)
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(UPSERT_KV, (key, value, now_rfc3339()))?;
        Ok(())
    }

    fn put_many(&mut self, pairs: &[(&str, &str)]) -> Result<(), StoreError> {
        let updated_at = now_rfc3339();
        let tx = self.conn.transaction()?;
        for (k, v) in pairs {
            tx.execute(UPSERT_KV, (k, v, &updated_at))?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Volatile store for tests and dry runs. `fail_writes` simulates a
/// store that accepts reads but rejects every write.
#[derive(Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
    pub fail_writes: bool,
    pub writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        self.writes += 1;
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
