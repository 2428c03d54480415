//! Durable reading progress, keyed by (user, document).
//!
//! Progress is a convenience: the reading loop keeps going when a save fails.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("progress database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("progress store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub user_id: String,
    pub document_id: String,
    pub global_index: usize,
    pub total_words: usize,
    /// Seconds since the Unix epoch.
    pub updated_at: u64,
}

/// Trait for progress persistence backends.
pub trait ProgressStore: Send + Sync {
    fn save_progress(
        &self,
        user_id: &str,
        document_id: &str,
        global_index: usize,
        total_words: usize,
    ) -> Result<(), ProgressError>;

    /// The saved global index, if any.
    fn load_progress(&self, user_id: &str, document_id: &str)
    -> Result<Option<usize>, ProgressError>;
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Process-local progress, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: DashMap<(String, String), ProgressRecord>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, user_id: &str, document_id: &str) -> Option<ProgressRecord> {
        self.records
            .get(&(user_id.to_string(), document_id.to_string()))
            .map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn save_progress(
        &self,
        user_id: &str,
        document_id: &str,
        global_index: usize,
        total_words: usize,
    ) -> Result<(), ProgressError> {
        self.records.insert(
            (user_id.to_string(), document_id.to_string()),
            ProgressRecord {
                user_id: user_id.to_string(),
                document_id: document_id.to_string(),
                global_index,
                total_words,
                updated_at: now_epoch(),
            },
        );
        Ok(())
    }

    fn load_progress(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<usize>, ProgressError> {
        Ok(self.record(user_id, document_id).map(|r| r.global_index))
    }
}

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path) -> Result<Connection, rusqlite::Error> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

/// Progress in a SQLite file, one row per (user, document).
pub struct SqliteProgressStore {
    conn: Mutex<Connection>,
}

impl SqliteProgressStore {
    pub fn open(path: &Path) -> Result<Self, ProgressError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let conn = open_sqlite(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS reading_progress (
                 user_id      TEXT NOT NULL,
                 document_id  TEXT NOT NULL,
                 global_index INTEGER NOT NULL,
                 total_words  INTEGER NOT NULL,
                 updated_at   INTEGER NOT NULL,
                 PRIMARY KEY (user_id, document_id)
             );",
        )?;
        tracing::debug!(path = %path.display(), "opened progress database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn record(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<ProgressRecord>, ProgressError> {
        let conn = self.conn.lock().map_err(|_| ProgressError::Poisoned)?;
        let record = conn
            .query_row(
                "SELECT global_index, total_words, updated_at FROM reading_progress
                 WHERE user_id = ?1 AND document_id = ?2",
                params![user_id, document_id],
                |row| {
                    Ok(ProgressRecord {
                        user_id: user_id.to_string(),
                        document_id: document_id.to_string(),
                        global_index: row.get::<_, i64>(0)? as usize,
                        total_words: row.get::<_, i64>(1)? as usize,
                        updated_at: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

impl ProgressStore for SqliteProgressStore {
    fn save_progress(
        &self,
        user_id: &str,
        document_id: &str,
        global_index: usize,
        total_words: usize,
    ) -> Result<(), ProgressError> {
        let conn = self.conn.lock().map_err(|_| ProgressError::Poisoned)?;
        conn.execute(
            "INSERT INTO reading_progress
                 (user_id, document_id, global_index, total_words, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_id, document_id) DO UPDATE SET
                 global_index = excluded.global_index,
                 total_words  = excluded.total_words,
                 updated_at   = excluded.updated_at",
            params![
                user_id,
                document_id,
                global_index as i64,
                total_words as i64,
                now_epoch() as i64
            ],
        )?;
        Ok(())
    }

    fn load_progress(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<usize>, ProgressError> {
        Ok(self.record(user_id, document_id)?.map(|r| r.global_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryProgressStore::new();
        assert_eq!(store.load_progress("ana", "book").unwrap(), None);
        store.save_progress("ana", "book", 120, 5000).unwrap();
        store.save_progress("ana", "book", 220, 5000).unwrap();
        store.save_progress("ben", "book", 7, 5000).unwrap();
        assert_eq!(store.load_progress("ana", "book").unwrap(), Some(220));
        assert_eq!(store.load_progress("ben", "book").unwrap(), Some(7));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("progress.db");

        {
            let store = SqliteProgressStore::open(&path).unwrap();
            store.save_progress("ana", "book", 100, 900).unwrap();
            store.save_progress("ana", "book", 300, 900).unwrap();
        }

        let store = SqliteProgressStore::open(&path).unwrap();
        assert_eq!(store.load_progress("ana", "book").unwrap(), Some(300));
        assert_eq!(store.load_progress("ana", "other").unwrap(), None);
        let record = store.record("ana", "book").unwrap().unwrap();
        assert_eq!(record.total_words, 900);
        assert!(record.updated_at > 0);
    }
}
