use thiserror::Error;

use crate::state::StateError;

/// Errors that abort one account's sync pass.
///
/// Feed failures never appear here: the engine soft-fails on them.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Ledger write failed: {0}")]
    Ledger(#[source] StateError),

    #[error("Checkpoint update failed: {0}")]
    Checkpoint(#[source] StateError),

    #[error("Local count failed: {0}")]
    Count(#[source] StateError),
}
