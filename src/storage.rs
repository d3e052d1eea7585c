use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

use crate::error::{ClientError, ClientResult};

pub const SETTINGS_KEY: &str = "corncare-ai-settings";
pub const CONVERSATIONS_KEY: &str = "corncare-conversations";
pub const USER_KEY: &str = "corncare-user";
pub const AUTH_TOKEN_KEY: &str = "corncare-auth-token";

/// Persisted client state, keyed by string.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> ClientResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> ClientResult<()>;
    fn remove(&self, key: &str) -> ClientResult<()>;
    fn clear(&self) -> ClientResult<()>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> ClientResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn in_memory() -> ClientResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> ClientResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> ClientResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ClientError::Storage(format!("store lock poisoned: {e}")))?;
        Ok(f(&conn)?)
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
                .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now()],
            )
            .map(|_| ())
        })
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.with_conn(|conn| conn.execute("DELETE FROM kv WHERE key = ?1", params![key]).map(|_| ()))
    }

    fn clear(&self) -> ClientResult<()> {
        self.with_conn(|conn| conn.execute("DELETE FROM kv", []).map(|_| ()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> ClientResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|e| ClientError::Storage(format!("store lock poisoned: {e}")))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> ClientResult<()> {
        self.entries()?.clear();
        Ok(())
    }
}

/// Reads a JSON value; a corrupt entry reads as absent.
pub fn read_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> ClientResult<Option<T>> {
    let Some(payload) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&payload) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key, error = %e, "ignoring unreadable stored value");
            Ok(None)
        }
    }
}

pub fn write_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> ClientResult<()> {
    let payload = serde_json::to_string(value)?;
    store.set(key, &payload)
}

pub fn now() -> String {
    Utc::now().to_rfc3339()
}

pub fn mask_api_key(raw: &str) -> String {
    if raw.chars().count() <= 8 {
        return "********".to_string();
    }
    let head: String = raw.chars().take(4).collect();
    let tail: String = raw.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{head}***{tail}")
}
