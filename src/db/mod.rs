//! Database module for Contexter Sync
//!
//! Provides SQLite-backed durable settings: per-source sync configuration,
//! watermarks, device identity and the bounded sync/request logs.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

// Connection pooling
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database manager for thread-safe SQLite access
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Open (or create) a database file
    pub fn new(db_path: PathBuf) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(&db_path);

        let pool = Pool::builder()
            .max_size(8)
            .min_idle(Some(1))
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        "#)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        drop(conn);

        log::debug!("Database opened at {}", db_path.display());

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Open the database in the platform data directory
    pub fn open_default() -> DbResult<Self> {
        let dirs = directories::ProjectDirs::from("com", "contexter", "contexter")
            .ok_or_else(|| DbError::DataDir("Failed to get app directories".to_string()))?;
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .map_err(|e| DbError::DataDir(format!("{}: {}", data_dir.display(), e)))?;
        Self::new(default_db_file(data_dir))
    }

    /// Create an in-memory database (for testing)
    ///
    /// Every in-memory connection is a separate database, so the pool holds one.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory();

        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a connection from the pool
    #[inline]
    pub fn get_conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    // =========================================================================
    // SETTINGS
    // =========================================================================

    /// Get a raw JSON setting value
    pub fn get_setting_json(&self, key: &str) -> DbResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Get a setting value
    pub fn get_setting<T: serde::de::DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        match self.get_setting_json(key)? {
            Some(json) => {
                let value: T = serde_json::from_str(&json)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a setting value
    pub fn set_setting<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> DbResult<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, json],
        )?;

        Ok(())
    }

    /// Delete a setting
    pub fn delete_setting(&self, key: &str) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Prepend `entry` to the JSON array stored under `key`, keeping at most
    /// `cap` entries (newest first). Runs in one transaction.
    pub fn prepend_bounded(&self, key: &str, entry: serde_json::Value, cap: usize) -> DbResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;

        let mut entries: Vec<serde_json::Value> = match existing {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| DbError::Serialization(e.to_string()))?,
            None => Vec::new(),
        };
        entries.insert(0, entry);
        entries.truncate(cap);

        let json = serde_json::to_string(&entries)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        tx.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, json],
        )?;
        tx.commit()?;

        Ok(())
    }
}

fn default_db_file(data_dir: &Path) -> PathBuf {
    data_dir.join("contexter.db")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        enabled: bool,
        interval_minutes: u32,
    }

    #[test]
    fn test_settings_roundtrip() {
        let db = Database::in_memory().unwrap();
        assert!(db.get_setting::<Sample>("sample").unwrap().is_none());

        let sample = Sample { enabled: true, interval_minutes: 5 };
        db.set_setting("sample", &sample).unwrap();
        assert_eq!(db.get_setting::<Sample>("sample").unwrap(), Some(sample));

        db.delete_setting("sample").unwrap();
        assert!(db.get_setting::<Sample>("sample").unwrap().is_none());
    }

    #[test]
    fn test_settings_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        {
            let db = Database::new(db_path.clone()).unwrap();
            db.set_setting("serverUrl", "https://example.test").unwrap();
        }

        let db = Database::new(db_path).unwrap();
        assert_eq!(
            db.get_setting::<String>("serverUrl").unwrap().as_deref(),
            Some("https://example.test")
        );
    }

    #[test]
    fn test_prepend_bounded_evicts_oldest() {
        let db = Database::in_memory().unwrap();
        for i in 0..5 {
            db.prepend_bounded("logs", serde_json::json!(i), 3).unwrap();
        }

        let logs: Vec<i32> = db.get_setting("logs").unwrap().unwrap();
        assert_eq!(logs, vec![4, 3, 2]);
    }

    #[test]
    fn test_corrupt_setting_is_serialization_error() {
        let db = Database::in_memory().unwrap();
        db.set_setting("sample", "not an object").unwrap();
        assert!(matches!(
            db.get_setting::<Sample>("sample"),
            Err(DbError::Serialization(_))
        ));
    }
}
