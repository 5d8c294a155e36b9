// Persistent key-value storage for credential sets
// String keys and string values, same shape as browser local storage

use dashmap::DashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::error::StorageError;

/// Synchronous key-value store holding JSON-encoded credential sets
pub trait TokenStorage: Send + Sync {
    /// Read a value, `None` when the key is absent
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or replace a value
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory storage, lost when the process exits
#[derive(Default)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// SQLite-backed storage in a single `kv` table
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database file and ensure the table exists
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::debug!("Opening token storage: {}", path.display());
        let conn = rusqlite::Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory SQLite database, mostly useful in tests
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(rusqlite::Connection::open_in_memory()?)
    }

    fn from_connection(conn: rusqlite::Connection) -> Result<Self, StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl TokenStorage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;

        match conn.query_row("SELECT value FROM kv WHERE key = ?", [key], |row| row.get(0)) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        conn.execute("DELETE FROM kv WHERE key = ?", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn TokenStorage) {
        assert_eq!(storage.get("kp_tokens").unwrap(), None);

        storage.set("kp_tokens", r#"{"accessToken":"a"}"#).unwrap();
        assert_eq!(
            storage.get("kp_tokens").unwrap().as_deref(),
            Some(r#"{"accessToken":"a"}"#)
        );

        storage.set("kp_tokens", r#"{"accessToken":"b"}"#).unwrap();
        assert_eq!(
            storage.get("kp_tokens").unwrap().as_deref(),
            Some(r#"{"accessToken":"b"}"#)
        );

        storage.remove("kp_tokens").unwrap();
        assert_eq!(storage.get("kp_tokens").unwrap(), None);

        // Removing twice is fine
        storage.remove("kp_tokens").unwrap();
    }

    #[test]
    fn test_memory_storage() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn test_sqlite_storage_in_memory() {
        exercise(&SqliteStorage::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_storage_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.sqlite3");

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.set("kp_employee_tokens", "{}").unwrap();
        }

        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(
            storage.get("kp_employee_tokens").unwrap().as_deref(),
            Some("{}")
        );
    }

    #[test]
    fn test_sqlite_storage_reports_directory_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = SqliteStorage::open(&blocker.join("kp").join("storage.sqlite3")).unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
