//! Key-value table in a SQLite database.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use likeness_core::{BackendError, KeyValueStore};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum SqliteStoreError {
    #[error("failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<SqliteStoreError> for BackendError {
    fn from(err: SqliteStoreError) -> Self {
        BackendError::new("sqlite store", err)
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SqliteStoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Last write time of `key`, as stored (RFC 3339).
    pub fn updated_at(&self, key: &str) -> Result<Option<String>, SqliteStoreError> {
        let ts = self
            .conn
            .query_row(
                "SELECT updated_at FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(SqliteStoreError::from)?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.conn
            .execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .map_err(SqliteStoreError::from)?;
        tracing::debug!(key, bytes = value.len(), "sqlite store: wrote value");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sqlite_store_upsert() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("faces").unwrap(), None);
        store.set("faces", "{\"a\":1}").unwrap();
        store.set("faces", "{\"b\":2}").unwrap();
        assert_eq!(store.get("faces").unwrap().as_deref(), Some("{\"b\":2}"));
        assert!(store.updated_at("faces").unwrap().is_some());
    }

    #[test]
    fn test_sqlite_store_remove() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.set("faces", "{}").unwrap();
        store.remove("faces").unwrap();
        store.remove("faces").unwrap();
        assert_eq!(store.get("faces").unwrap(), None);
        assert_eq!(store.updated_at("faces").unwrap(), None);
    }

    #[test]
    fn test_sqlite_store_persists_across_connections() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/faces.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.set("faces", "{}").unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("faces").unwrap().as_deref(), Some("{}"));
    }
}
