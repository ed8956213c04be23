//! Database schema definitions and migrations.

use rusqlite::Connection;

use super::error::StateError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema DDL for version 1.
///
/// `value` holds the `DECIMAL(36,18)` text form so sums stay exact;
/// `timestamp` is unix milliseconds.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS fil_transfers (
    cid TEXT PRIMARY KEY NOT NULL,
    from_addr TEXT NOT NULL,
    to_addr TEXT NOT NULL,
    value TEXT NOT NULL,
    height INTEGER NOT NULL CHECK (height >= 0),
    direction TEXT NOT NULL CHECK (direction IN ('in', 'out')),
    timestamp INTEGER NOT NULL,
    type TEXT NOT NULL DEFAULT 'unknown'
);

CREATE INDEX IF NOT EXISTS idx_fil_transfers_from ON fil_transfers(from_addr, direction);
CREATE INDEX IF NOT EXISTS idx_fil_transfers_to ON fil_transfers(to_addr, direction);
CREATE INDEX IF NOT EXISTS idx_fil_transfers_type ON fil_transfers(type);

CREATE TABLE IF NOT EXISTS fil_last_count (
    address TEXT PRIMARY KEY NOT NULL,
    last_count INTEGER NOT NULL CHECK (last_count >= 0)
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account TEXT NOT NULL,
    mode TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    remote_total INTEGER DEFAULT 0,
    fetched INTEGER DEFAULT 0,
    inserted INTEGER DEFAULT 0,
    interrupted INTEGER DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_account ON sync_runs(account);
"#;

/// Get the current schema version from the database.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StateError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the database schema.
///
/// Idempotent; safe on both new and existing databases.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    if current_version < SCHEMA_VERSION {
        conn.execute_batch(SCHEMA_V1)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::debug!("Initialized database schema at version {}", SCHEMA_VERSION);
    }

    Ok(())
}
