// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Durable key-value backends
//!
//! The metadata store only needs `read`/`write` of whole values. Writes must
//! be durable when they return.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::StoreError;
use crate::commit::AtomicFileCommitter;

/// Synchronous, durable key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value. Returns None if the key doesn't exist.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes a value, replacing any previous one.
    fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Deletes a value. Deleting a missing key succeeds.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Cleans up after writes a crash interrupted. Returns how many
    /// leftovers were removed.
    fn recover(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// One file per key, replaced atomically on every write.
pub struct FileKeyValueStore {
    dir: PathBuf,
    committer: AtomicFileCommitter,
}

impl FileKeyValueStore {
    /// Creates a file-backed store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            committer: AtomicFileCommitter::new(),
        })
    }

    /// Directory holding the value files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_file_path(&self, key: &str) -> PathBuf {
        // Sanitize the key to prevent path traversal
        let mut safe_key = key
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>();
        if safe_key.starts_with('.') {
            safe_key.replace_range(..1, "_");
        }
        self.dir.join(safe_key)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.key_file_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.committer
            .write_atomic(&self.key_file_path(key), value)
            .map_err(StoreError::from)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.key_file_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn recover(&self) -> Result<usize, StoreError> {
        Ok(self.committer.purge_stale(&self.dir)?)
    }
}

/// SQLite-backed store, one row per key.
#[cfg(feature = "sqlite")]
pub struct SqliteKeyValueStore {
    conn: Mutex<rusqlite::Connection>,
}

#[cfg(feature = "sqlite")]
impl SqliteKeyValueStore {
    /// Opens or creates a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::init(rusqlite::Connection::open(path)?)
    }

    /// Creates an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[cfg(feature = "sqlite")]
impl KeyValueStore for SqliteKeyValueStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        use rusqlite::OptionalExtension;

        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
        Ok(())
    }
}

/// In-memory store. Not durable; meant for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.remove(key);
        Ok(())
    }
}
