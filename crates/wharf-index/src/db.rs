//! SQLite connection management.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use rusqlite::Connection;
use wharf_core::{
    error::{ErrorContext, FeedError},
    FeedResult,
};

/// Thread-safe wrapper around a single SQLite connection.
///
/// The connection mutex is the single-writer discipline: every mutation
/// runs inside a transaction while holding the guard, so readers only ever
/// observe fully-committed entries.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (creating if needed) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> FeedResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating index directory {}", parent.display()))?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn in_memory() -> FeedResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Locks the connection and returns the guard.
    pub fn conn(&self) -> FeedResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| FeedError::PoisonError)
    }
}

/// Maps a SQLite error into the feed error taxonomy.
pub fn db_err(err: rusqlite::Error) -> FeedError {
    FeedError::Database(err.to_string())
}
