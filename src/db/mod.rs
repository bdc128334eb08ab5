mod schema;
pub mod collections;
pub mod faces;
pub mod photos;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub use collections::FaceCollection;
pub use faces::{BoundingBox, Face, FaceWithPerson, Person};
pub use photos::Photo;
pub use schema::SCHEMA;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(rusqlite::Error),

    /// A uniqueness constraint rejected the write; the caller may retry.
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// A value failed validation before reaching the database.
    #[error("invalid value: {0}")]
    Invalid(String),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                DbError::Conflict(err.to_string())
            }
            _ => DbError::Sqlite(err),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Shared handle to the face store.
///
/// The connection sits behind a mutex so one instance can be shared across
/// threads; each method holds the lock for a single statement or transaction.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> DbResult<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite itself consistent.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
pub(crate) fn test_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.initialize().unwrap();
    db
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("faces.db");
        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let db = test_db();
        db.initialize().unwrap();
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = test_db();
        let enabled: i64 = db
            .conn()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
