//! Types for the ledger and sync-progress stores.

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::amount::{self, FilAmount};
use crate::feed::RawTransfer;

/// Type assigned to transfers the explorer left unclassified.
pub const UNKNOWN_KIND: &str = "unknown";

/// Direction of a transfer relative to the watched account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// Side of a transfer an aggregate is taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The account received the value (`to_addr`, direction `in`).
    Recipient,
    /// The account paid the value (`from_addr`, direction `out`).
    Sender,
}

impl Role {
    /// Default role for a transfer type: rewards and receipts are counted on
    /// the receiving side, sends, burns and fees on the paying side.
    pub fn for_kind(kind: &str) -> Self {
        match kind {
            "reward" | "receive" => Self::Recipient,
            _ => Self::Sender,
        }
    }

    pub(crate) fn direction(&self) -> Direction {
        match self {
            Self::Recipient => Direction::In,
            Self::Sender => Direction::Out,
        }
    }
}

/// Which engine path produced a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Incremental,
    Full,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Full => "full",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "incremental" => Some(Self::Incremental),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// A transfer mirrored from the explorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    /// Deterministic id, see [`record_id`].
    pub id: String,
    pub from: String,
    pub to: String,
    pub amount: FilAmount,
    pub block_height: u64,
    /// Millisecond precision.
    pub timestamp: DateTime<Utc>,
    /// Explorer classification (send, receive, reward, burn, miner-fee, ...).
    pub kind: String,
    pub direction: Direction,
}

impl TransferRecord {
    /// Normalize a raw feed entry seen while syncing `account`.
    ///
    /// `occurrence` counts earlier entries on the same page that are
    /// field-for-field identical to this one; it keeps such twins apart.
    pub fn from_raw(raw: &RawTransfer, account: &str, occurrence: u32) -> Self {
        let direction = if raw.from == account {
            Direction::Out
        } else {
            Direction::In
        };
        let kind = raw
            .kind
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(UNKNOWN_KIND)
            .to_string();
        let amount = amount::to_decimal(&raw.value);
        let id = record_id(raw, &kind, direction, &amount, occurrence);
        let timestamp = Utc
            .timestamp_millis_opt(raw.timestamp.saturating_mul(1000))
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH);

        Self {
            id,
            from: raw.from.clone(),
            to: raw.to.clone(),
            amount,
            block_height: raw.height,
            timestamp,
            kind,
            direction,
        }
    }
}

/// Derive a record id from fields the explorer never changes.
///
/// A single message can produce several transfers (value, burn fee, miner
/// fee), so the type, both parties and the amount are part of the key.
/// Direction keeps the two sides of a transfer between two watched accounts
/// apart. Entries without a message are told apart by amount, then by
/// `occurrence`.
pub fn record_id(
    raw: &RawTransfer,
    kind: &str,
    direction: Direction,
    amount: &FilAmount,
    occurrence: u32,
) -> String {
    let height = raw.height.to_string();
    let amount = amount.to_fixed_string();
    let occurrence = occurrence.to_string();
    let mut hasher = Sha256::new();
    for part in [
        raw.message.as_deref().unwrap_or(""),
        height.as_str(),
        kind,
        direction.as_str(),
        raw.from.as_str(),
        raw.to.as_str(),
        amount.as_str(),
        occurrence.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Statistics recorded when a sync run completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunStats {
    pub remote_total: u64,
    pub fetched: u64,
    pub inserted: u64,
    pub interrupted: bool,
}

/// The most recent sync run of an account, for status output.
#[derive(Debug, Clone)]
pub struct SyncRunRecord {
    pub account: String,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: SyncRunStats,
}
