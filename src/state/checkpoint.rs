//! Per-account sync progress: the last known remote count and run history.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;

use super::db::SqliteStateDb;
use super::error::StateError;
use super::types::{SyncMode, SyncRunRecord, SyncRunStats};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last remote count recorded for `account`, if any.
    async fn get_checkpoint(&self, account: &str) -> Result<Option<u64>, StateError>;

    /// Record `value` as the last known remote count.
    ///
    /// Insert-or-update; an existing checkpoint is never lowered.
    async fn set_checkpoint(&self, account: &str, value: u64) -> Result<(), StateError>;

    /// Start a new sync run and return its ID.
    async fn start_sync_run(&self, account: &str, mode: SyncMode) -> Result<i64, StateError>;

    /// Complete a sync run with statistics.
    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats)
        -> Result<(), StateError>;

    /// Most recent sync run of `account`.
    async fn last_sync_run(&self, account: &str) -> Result<Option<SyncRunRecord>, StateError>;
}

#[async_trait]
impl CheckpointStore for SqliteStateDb {
    async fn get_checkpoint(&self, account: &str) -> Result<Option<u64>, StateError> {
        let conn = self.lock()?;

        let value: Option<i64> = conn
            .query_row(
                "SELECT last_count FROM fil_last_count WHERE address = ?1",
                [account],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::query("read checkpoint"))?;

        Ok(value.map(|v| v as u64))
    }

    async fn set_checkpoint(&self, account: &str, value: u64) -> Result<(), StateError> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO fil_last_count (address, last_count) VALUES (?1, ?2)
            ON CONFLICT(address) DO UPDATE SET
                last_count = MAX(last_count, excluded.last_count)
            "#,
            rusqlite::params![account, value as i64],
        )
        .map_err(StateError::query("write checkpoint"))?;

        Ok(())
    }

    async fn start_sync_run(&self, account: &str, mode: SyncMode) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp_millis();

        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO sync_runs (account, mode, started_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![account, mode.as_str(), started_at],
        )
        .map_err(StateError::query("start sync run"))?;

        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
    ) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp_millis();

        let conn = self.lock()?;

        conn.execute(
            r#"
            UPDATE sync_runs SET
                completed_at = ?1,
                remote_total = ?2,
                fetched = ?3,
                inserted = ?4,
                interrupted = ?5
            WHERE id = ?6
            "#,
            rusqlite::params![
                completed_at,
                stats.remote_total as i64,
                stats.fetched as i64,
                stats.inserted as i64,
                stats.interrupted,
                run_id,
            ],
        )
        .map_err(StateError::query("complete sync run"))?;

        Ok(())
    }

    async fn last_sync_run(&self, account: &str) -> Result<Option<SyncRunRecord>, StateError> {
        let conn = self.lock()?;

        let run = conn
            .query_row(
                r#"
                SELECT account, mode, started_at, completed_at, remote_total, fetched, inserted, interrupted
                FROM sync_runs WHERE account = ?1
                ORDER BY id DESC LIMIT 1
                "#,
                [account],
                |row| Ok(row_to_sync_run(row)),
            )
            .optional()
            .map_err(StateError::query("read last sync run"))?;

        Ok(run)
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Convert a database row to a SyncRunRecord.
fn row_to_sync_run(row: &rusqlite::Row<'_>) -> SyncRunRecord {
    let account: String = row.get(0).unwrap_or_default();
    let mode_str: String = row.get(1).unwrap_or_default();
    let started_at: i64 = row.get(2).unwrap_or(0);
    let completed_at: Option<i64> = row.get(3).ok().flatten();
    let remote_total: i64 = row.get(4).unwrap_or(0);
    let fetched: i64 = row.get(5).unwrap_or(0);
    let inserted: i64 = row.get(6).unwrap_or(0);
    let interrupted: bool = row.get(7).unwrap_or(false);

    SyncRunRecord {
        account,
        mode: SyncMode::from_str(&mode_str).unwrap_or(SyncMode::Incremental),
        started_at: millis_to_utc(started_at),
        completed_at: completed_at.map(millis_to_utc),
        stats: SyncRunStats {
            remote_total: remote_total as u64,
            fetched: fetched as u64,
            inserted: inserted as u64,
            interrupted,
        },
    }
}
