//! Database initialization and startup
//!
//! Opens the download database and ensures all required tables exist.

use std::path::Path;

use rusqlite::Connection;

use super::schema::{create_all_tables, schema_version, SCHEMA_VERSION};

/// Error type for database startup
#[derive(Debug)]
pub enum StartError {
    /// Database was written by a newer schema
    UnsupportedVersion(u32),
    /// SQLite error
    Database(rusqlite::Error),
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::UnsupportedVersion(v) => write!(
                f,
                "database schema version {} is newer than supported version {}",
                v, SCHEMA_VERSION
            ),
            StartError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for StartError {}

impl From<rusqlite::Error> for StartError {
    fn from(e: rusqlite::Error) -> Self {
        StartError::Database(e)
    }
}

/// Opens the database file and ensures all required tables exist
///
/// # Errors
/// - `StartError::UnsupportedVersion` if the file was written by a newer schema
/// - `StartError::Database` for SQLite errors
pub fn start_db(db_path: &Path) -> Result<Connection, StartError> {
    let conn = Connection::open(db_path)?;

    // PRAGMA returns the new mode, so query_row instead of execute
    let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    create_all_tables(&conn)?;

    if let Some(version) = schema_version(&conn)? {
        if version > SCHEMA_VERSION {
            return Err(StartError::UnsupportedVersion(version));
        }
    }

    Ok(conn)
}

/// Create an in-memory database for testing
pub fn start_memory_db() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    // WAL mode doesn't work with in-memory databases
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_all_tables(&conn)?;
    Ok(conn)
}
