//! # streetpass-db
//!
//! Local persistence for a StreetPass device.
//! Manages the single SQLite database at `$STREETPASS_DATA_DIR/streetpass.db`.
//!
//! ## Schema
//!
//! - WAL mode
//! - `kv`: string-keyed records (serialized profile, raw identity)
//! - `encounters`: one row per peer ever seen
//! - All timestamps are Unix epoch milliseconds
//! - Schema version stored in `PRAGMA user_version`
//!
//! [`SqliteStore`] wraps a connection behind the [`LocalStore`] trait, which
//! is what the session layer consumes.

pub mod migrations;
pub mod queries;
pub mod schema;
pub mod store;

pub use store::{LocalStore, SqliteStore};

use rusqlite::Connection;
use std::path::Path;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// File name of the database inside the data directory.
pub const DB_FILE_NAME: &str = "streetpass.db";

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the database at the given path.
///
/// Configures WAL mode and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_wal_mode() {
        let conn = open_memory().expect("open");
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("get journal_mode");
        // In-memory databases use "memory" mode, not WAL
        assert!(mode == "wal" || mode == "memory");
    }

    #[test]
    fn test_open_file_twice() {
        let dir = std::env::temp_dir().join(format!(
            "streetpass-db-test-{}-{}",
            std::process::id(),
            streetpass_types::now_ms()
        ));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join(DB_FILE_NAME);

        let conn = open(&path).expect("first open");
        queries::kv::set(&conn, "identity", "abc").expect("set");
        drop(conn);

        let conn = open(&path).expect("second open");
        assert_eq!(queries::kv::get(&conn, "identity").expect("get"), "abc");
        drop(conn);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
