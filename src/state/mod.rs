//! Durable state: the mirrored transfer ledger and per-account sync progress.
//!
//! Both stores live in one SQLite file. The engine only sees the
//! [`LedgerStore`] and [`CheckpointStore`] traits, combined as [`StateDb`].

pub mod checkpoint;
pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use checkpoint::CheckpointStore;
pub use db::{today_utc, LedgerStore, SqliteStateDb};
pub use error::StateError;
pub use types::{Role, SyncMode, SyncRunRecord, SyncRunStats, TransferRecord};

/// Everything the sync engine needs from storage.
pub trait StateDb: LedgerStore + CheckpointStore {}

impl<T: LedgerStore + CheckpointStore> StateDb for T {}
