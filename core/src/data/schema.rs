//! Database schema definitions
//!
//! Every table is created with `CREATE TABLE IF NOT EXISTS`, so running the
//! schema against an existing database is a no-op.

use rusqlite::{params, Connection, OptionalExtension};

/// Current schema version written to `schema_version`
pub const SCHEMA_VERSION: u32 = 1;

/// Creates all required database tables
pub fn create_all_tables(conn: &Connection) -> rusqlite::Result<()> {
    create_schema_version_table(conn)?;
    create_download_tables(conn)?;
    record_schema_version(conn)?;
    Ok(())
}

/// Single-row table holding the schema version
pub fn create_schema_version_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Persisted downloads and their per-range progress
///
/// `strategy` is `sequential` or `parallel`. `download_ranges` rows only
/// exist for parallel downloads and are removed with their parent row.
pub fn create_download_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS downloads (
            hash TEXT PRIMARY KEY NOT NULL,
            file_name TEXT NOT NULL,
            target_path TEXT NOT NULL,
            size INTEGER NOT NULL CHECK (size >= 0),
            downloaded INTEGER NOT NULL CHECK (downloaded >= 0),
            strategy TEXT NOT NULL,
            status INTEGER NOT NULL,
            saved_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS download_ranges (
            hash TEXT NOT NULL,
            range_index INTEGER NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            next_offset INTEGER NOT NULL,
            PRIMARY KEY (hash, range_index),
            FOREIGN KEY (hash) REFERENCES downloads(hash) ON DELETE CASCADE
        )",
        [],
    )?;
    Ok(())
}

fn record_schema_version(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schema_version (id, version) VALUES (1, ?1)
         ON CONFLICT(id) DO NOTHING",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}

/// Read the stored schema version, if any
pub fn schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    conn.query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
        row.get(0)
    })
    .optional()
}
