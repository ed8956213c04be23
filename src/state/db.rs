//! Ledger store trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;

use super::error::StateError;
use super::schema;
use super::types::{Role, TransferRecord};
use crate::amount::FilAmount;

/// Durable store of mirrored transfers.
///
/// Object-safe so the engine can hold it as `Arc<dyn StateDb>`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a batch in one transaction, skipping ids already present.
    ///
    /// Returns the number of rows actually inserted. Either the whole batch
    /// is committed or none of it is.
    async fn insert_ignoring_duplicates(
        &self,
        records: &[TransferRecord],
    ) -> Result<u64, StateError>;

    /// Number of stored transfers belonging to `account`: rows it sent
    /// (`out`) plus rows it received (`in`).
    async fn count_for_account(&self, account: &str) -> Result<u64, StateError>;

    /// Total value of `kind` transfers on the `role` side of `account`.
    /// Zero when nothing matches.
    async fn sum_by_type_and_role(
        &self,
        kind: &str,
        account: &str,
        role: Role,
    ) -> Result<FilAmount, StateError>;

    /// Like [`LedgerStore::sum_by_type_and_role`], restricted to transfers
    /// whose timestamp falls on `date` (UTC).
    async fn sum_by_type_for_date(
        &self,
        kind: &str,
        account: &str,
        role: Role,
        date: NaiveDate,
    ) -> Result<FilAmount, StateError>;

    /// Distinct transfer types stored for `account`, sorted.
    async fn kinds_for_account(&self, account: &str) -> Result<Vec<String>, StateError>;
}

/// SQLite implementation of the ledger and sync-progress stores.
pub struct SqliteStateDb {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    pub(super) conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStateDb {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent() {
                if !parent.as_os_str().is_empty() {
                    let _ = std::fs::create_dir_all(parent);
                }
            }

            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Get the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|_| StateError::Poisoned)
    }
}

/// Sum stored decimal values, skipping (and logging) any that do not parse.
fn sum_values(values: Vec<String>) -> FilAmount {
    values
        .into_iter()
        .filter_map(|v| match v.parse::<FilAmount>() {
            Ok(amount) => Some(amount),
            Err(e) => {
                tracing::warn!(value = %v, error = %e, "Skipping unparseable stored value");
                None
            }
        })
        .sum()
}

/// Column and direction selecting the `role` side of `account`.
fn role_filter(role: Role) -> (&'static str, &'static str) {
    match role {
        Role::Recipient => ("to_addr", role.direction().as_str()),
        Role::Sender => ("from_addr", role.direction().as_str()),
    }
}

#[async_trait]
impl LedgerStore for SqliteStateDb {
    async fn insert_ignoring_duplicates(
        &self,
        records: &[TransferRecord],
    ) -> Result<u64, StateError> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;

        conn.execute("BEGIN TRANSACTION", [])
            .map_err(StateError::query("insert transfers"))?;

        let result = (|| {
            let mut stmt = conn
                .prepare_cached(
                    r#"
                    INSERT OR IGNORE INTO fil_transfers
                        (cid, from_addr, to_addr, value, height, direction, timestamp, type)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                )
                .map_err(StateError::query("insert transfers"))?;

            let mut inserted = 0u64;
            for record in records {
                let changed = stmt
                    .execute(rusqlite::params![
                        record.id,
                        record.from,
                        record.to,
                        record.amount.to_fixed_string(),
                        record.block_height as i64,
                        record.direction.as_str(),
                        record.timestamp.timestamp_millis(),
                        record.kind,
                    ])
                    .map_err(StateError::query("insert transfers"))?;
                inserted += changed as u64;
            }

            Ok::<_, StateError>(inserted)
        })();

        match result {
            Ok(inserted) => {
                conn.execute("COMMIT", [])
                    .map_err(StateError::query("insert transfers"))?;
                Ok(inserted)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                tracing::error!(error = %e, batch = records.len(), "Batch insert rolled back");
                Err(e)
            }
        }
    }

    async fn count_for_account(&self, account: &str) -> Result<u64, StateError> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row(
                r#"
                SELECT COUNT(*) FROM fil_transfers
                WHERE (from_addr = ?1 AND direction = 'out')
                   OR (to_addr = ?1 AND direction = 'in')
                "#,
                [account],
                |row| row.get(0),
            )
            .map_err(StateError::query("count transfers"))?;

        Ok(count as u64)
    }

    async fn sum_by_type_and_role(
        &self,
        kind: &str,
        account: &str,
        role: Role,
    ) -> Result<FilAmount, StateError> {
        let (column, direction) = role_filter(role);

        let values: Vec<String> = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT value FROM fil_transfers WHERE type = ?1 AND {} = ?2 AND direction = ?3",
                    column
                ))
                .map_err(StateError::query("sum transfers by type"))?;
            let rows = stmt
                .query_map(rusqlite::params![kind, account, direction], |row| row.get(0))
                .map_err(StateError::query("sum transfers by type"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(StateError::query("sum transfers by type"))?;
            rows
        };

        Ok(sum_values(values))
    }

    async fn sum_by_type_for_date(
        &self,
        kind: &str,
        account: &str,
        role: Role,
        date: NaiveDate,
    ) -> Result<FilAmount, StateError> {
        let (column, direction) = role_filter(role);
        let day = date.format("%Y-%m-%d").to_string();

        let values: Vec<String> = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT value FROM fil_transfers
                     WHERE type = ?1 AND {} = ?2 AND direction = ?3
                       AND date(timestamp / 1000, 'unixepoch') = ?4",
                    column
                ))
                .map_err(StateError::query("sum transfers by date"))?;
            let rows = stmt
                .query_map(rusqlite::params![kind, account, direction, day], |row| {
                    row.get(0)
                })
                .map_err(StateError::query("sum transfers by date"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(StateError::query("sum transfers by date"))?;
            rows
        };

        Ok(sum_values(values))
    }

    async fn kinds_for_account(&self, account: &str) -> Result<Vec<String>, StateError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT DISTINCT type FROM fil_transfers
                WHERE (from_addr = ?1 AND direction = 'out')
                   OR (to_addr = ?1 AND direction = 'in')
                ORDER BY type
                "#,
            )
            .map_err(StateError::query("list transfer types"))?;

        let kinds = stmt
            .query_map([account], |row| row.get(0))
            .map_err(StateError::query("list transfer types"))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(StateError::query("list transfer types"))?;

        Ok(kinds)
    }
}

/// Today's date in UTC, the default for date-filtered aggregates.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::Direction;
    use chrono::{TimeZone, Utc};
    use std::fs;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("filsync")
            .join("state_db_tests")
            .join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn record(id: &str, from: &str, to: &str, direction: Direction, kind: &str, value: &str) -> TransferRecord {
        TransferRecord {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            amount: value.parse().unwrap(),
            block_height: 100,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            kind: kind.to_string(),
            direction,
        }
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let dir = test_dir("open_creates");
        let path = dir.join("ledger.db");
        let db = SqliteStateDb::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path);
    }

    #[tokio::test]
    async fn test_open_creates_parent_dir() {
        let dir = test_dir("open_parent");
        let path = dir.join("nested").join("ledger.db");
        SqliteStateDb::open(&path).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_insert_counts_only_new_ids() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        let first = vec![
            record("a", "f0me", "f0x", Direction::Out, "send", "1"),
            record("b", "f0x", "f0me", Direction::In, "receive", "2"),
        ];
        assert_eq!(db.insert_ignoring_duplicates(&first).await.unwrap(), 2);

        // Overlapping batch: one old id, two new ones.
        let second = vec![
            record("b", "f0x", "f0me", Direction::In, "receive", "2"),
            record("c", "f0me", "f0y", Direction::Out, "send", "3"),
            record("d", "f0y", "f0me", Direction::In, "reward", "4"),
        ];
        assert_eq!(db.insert_ignoring_duplicates(&second).await.unwrap(), 2);
        assert_eq!(db.count_for_account("f0me").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_insert_empty_batch() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        assert_eq!(db.insert_ignoring_duplicates(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON fil_transfers
                 WHEN NEW.cid = 'bad' BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        }

        let batch = vec![
            record("ok1", "f0me", "f0x", Direction::Out, "send", "1"),
            record("bad", "f0me", "f0x", Direction::Out, "send", "1"),
        ];
        assert!(db.insert_ignoring_duplicates(&batch).await.is_err());
        assert_eq!(db.count_for_account("f0me").await.unwrap(), 0);

        // Connection is usable again after the rollback.
        let good = vec![record("ok1", "f0me", "f0x", Direction::Out, "send", "1")];
        assert_eq!(db.insert_ignoring_duplicates(&good).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_count_does_not_double_count_watched_pair() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        // Same transfer mirrored once for each watched side.
        let batch = vec![
            record("a-out", "f0a", "f0b", Direction::Out, "send", "1"),
            record("b-in", "f0a", "f0b", Direction::In, "send", "1"),
        ];
        db.insert_ignoring_duplicates(&batch).await.unwrap();
        assert_eq!(db.count_for_account("f0a").await.unwrap(), 1);
        assert_eq!(db.count_for_account("f0b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sum_defaults_to_zero() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        let sum = db
            .sum_by_type_and_role("reward", "f0nobody", Role::Recipient)
            .await
            .unwrap();
        assert!(sum.is_zero());
    }

    #[tokio::test]
    async fn test_sum_by_type_and_role() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        let batch = vec![
            record("r1", "f02", "f0me", Direction::In, "reward", "1.25"),
            record("r2", "f02", "f0me", Direction::In, "reward", "0.75"),
            record("s1", "f0me", "f0x", Direction::Out, "send", "10"),
            record("b1", "f0me", "f099", Direction::Out, "burn", "0.000000000000000001"),
        ];
        db.insert_ignoring_duplicates(&batch).await.unwrap();

        let rewards = db
            .sum_by_type_and_role("reward", "f0me", Role::Recipient)
            .await
            .unwrap();
        assert_eq!(rewards, FilAmount::from_whole(2));

        let sent = db
            .sum_by_type_and_role("send", "f0me", Role::Sender)
            .await
            .unwrap();
        assert_eq!(sent, FilAmount::from_whole(10));

        let burned = db
            .sum_by_type_and_role("burn", "f0me", Role::Sender)
            .await
            .unwrap();
        assert_eq!(burned.to_string(), "0.000000000000000001");

        // Wrong side of the transfer.
        let as_recipient = db
            .sum_by_type_and_role("send", "f0me", Role::Recipient)
            .await
            .unwrap();
        assert!(as_recipient.is_zero());
    }

    #[tokio::test]
    async fn test_sum_by_type_for_date() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        let mut today = record("t1", "f02", "f0me", Direction::In, "reward", "3");
        today.timestamp = Utc.with_ymd_and_hms(2024, 3, 2, 23, 59, 59).unwrap();
        let mut yesterday = record("y1", "f02", "f0me", Direction::In, "reward", "5");
        yesterday.timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        db.insert_ignoring_duplicates(&[today, yesterday]).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let sum = db
            .sum_by_type_for_date("reward", "f0me", Role::Recipient, day)
            .await
            .unwrap();
        assert_eq!(sum, FilAmount::from_whole(3));

        let empty_day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let sum = db
            .sum_by_type_for_date("reward", "f0me", Role::Recipient, empty_day)
            .await
            .unwrap();
        assert!(sum.is_zero());
    }

    #[tokio::test]
    async fn test_timestamp_keeps_milliseconds() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        let mut r = record("ms", "f0me", "f0x", Direction::Out, "send", "1");
        r.timestamp = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        db.insert_ignoring_duplicates(&[r]).await.unwrap();

        let conn = db.lock().unwrap();
        let stored: i64 = conn
            .query_row("SELECT timestamp FROM fil_transfers WHERE cid = 'ms'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(stored, 1_700_000_000_123);
    }

    #[tokio::test]
    async fn test_kinds_for_account() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        let batch = vec![
            record("1", "f0me", "f0x", Direction::Out, "send", "1"),
            record("2", "f02", "f0me", Direction::In, "reward", "1"),
            record("3", "f0me", "f099", Direction::Out, "burn", "1"),
            record("4", "f0me", "f0y", Direction::Out, "send", "1"),
        ];
        db.insert_ignoring_duplicates(&batch).await.unwrap();
        assert_eq!(
            db.kinds_for_account("f0me").await.unwrap(),
            vec!["burn", "reward", "send"]
        );
    }
}
