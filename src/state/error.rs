//! Error types for the ledger and sync-progress stores.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Cannot open ledger at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Schema setup or a connection pragma failed.
    #[error("Ledger schema setup failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A statement failed; `op` names what the store was doing.
    #[error("Failed to {op}: {source}")]
    Query {
        op: &'static str,
        source: rusqlite::Error,
    },

    /// A thread panicked while holding the connection.
    #[error("Ledger connection lock poisoned")]
    Poisoned,

    #[error("Blocking ledger task failed: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    #[error("Ledger schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl StateError {
    /// `map_err` adapter tagging a rusqlite error with the operation name.
    pub fn query(op: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Query { op, source }
    }
}
