//! Reconciliation engine. Mirrors the remote transfer feed of each watched
//! account into the ledger.
//!
//! An incremental pass compares the feed's total count with the local row
//! count and pulls exactly the difference, newest-first, one committed page
//! at a time. The delta is always derived from the live count, so rows that
//! were committed before a crash are never fetched as "new" twice.
//! Duplicate-ignoring inserts make any overlap harmless. Older rows lost to
//! an interrupted pass are only recovered by a full sync.

pub mod error;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::feed::{RawTransfer, TransferFeed, TransferPage, MAX_PAGE_SIZE};
use crate::state::{
    CheckpointStore, LedgerStore, StateDb, SyncMode, SyncRunStats, TransferRecord,
};

pub use error::SyncError;

/// Result of one account pass that did not hit a local error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Local data already covers the remote count.
    UpToDate { remote_total: u64, local_total: u64 },
    /// Records were pulled; `complete` is false when paging stopped on a
    /// short or failed page before the delta was covered.
    Synced {
        remote_total: u64,
        fetched: u64,
        inserted: u64,
        complete: bool,
    },
    /// The total count could not be fetched; nothing was written.
    RemoteUnavailable,
}

/// Per-account result of a pass over all watched accounts.
#[derive(Debug)]
pub struct AccountReport {
    pub account: String,
    pub result: Result<SyncOutcome, SyncError>,
}

#[derive(Debug, Default)]
pub struct PassReport {
    pub accounts: Vec<AccountReport>,
    pub cancelled: bool,
}

impl PassReport {
    pub fn failed(&self) -> usize {
        self.accounts.iter().filter(|a| a.result.is_err()).count()
    }

    pub fn inserted(&self) -> u64 {
        self.accounts
            .iter()
            .map(|a| match &a.result {
                Ok(SyncOutcome::Synced { inserted, .. }) => *inserted,
                _ => 0,
            })
            .sum()
    }
}

/// How a paging loop ended.
#[derive(Debug, Default)]
struct PageProgress {
    /// Feed entries walked past, including undecodable ones.
    consumed: u64,
    fetched: u64,
    malformed: u64,
    inserted: u64,
    /// A page came back shorter than requested.
    short_page: bool,
    /// A page request failed.
    feed_error: bool,
}

pub struct SyncEngine {
    feed: Arc<dyn TransferFeed>,
    db: Arc<dyn StateDb>,
    page_size: u32,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(feed: Arc<dyn TransferFeed>, db: Arc<dyn StateDb>, page_size: u32) -> Self {
        Self {
            feed,
            db,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Sync every account in order. A failing account is logged and skipped;
    /// it never stops the others. Cancellation is checked between accounts.
    pub async fn run_pass(
        &self,
        accounts: &[String],
        mode: SyncMode,
        shutdown_token: &CancellationToken,
    ) -> PassReport {
        let mut report = PassReport::default();

        for account in accounts {
            if shutdown_token.is_cancelled() {
                info!("Shutdown requested, skipping remaining accounts");
                report.cancelled = true;
                break;
            }

            let result = match mode {
                SyncMode::Incremental => self.sync_account(account).await,
                SyncMode::Full => self.full_sync_account(account).await,
            };

            match &result {
                Ok(outcome) => debug!(account = %account, ?outcome, "Account pass finished"),
                Err(e) => error!(account = %account, error = %e, "Account sync failed"),
            }

            report.accounts.push(AccountReport {
                account: account.clone(),
                result,
            });
        }

        info!(
            accounts = report.accounts.len(),
            failed = report.failed(),
            inserted = report.inserted(),
            mode = mode.as_str(),
            "Sync pass complete"
        );
        report
    }

    /// Incremental pass: fetch exactly `remote_total - local_total` records.
    pub async fn sync_account(&self, account: &str) -> Result<SyncOutcome, SyncError> {
        let remote_total = match self.feed.fetch_total_count(account).await {
            Ok(total) => total,
            Err(e) => {
                warn!(account = %account, error = %e, "Could not fetch remote count, skipping");
                return Ok(SyncOutcome::RemoteUnavailable);
            }
        };

        let local_total = self
            .db
            .count_for_account(account)
            .await
            .map_err(SyncError::Count)?;

        self.warn_on_checkpoint_drift(account, remote_total, local_total)
            .await;

        if remote_total <= local_total {
            debug!(account = %account, remote_total, local_total, "Up to date");
            return Ok(SyncOutcome::UpToDate {
                remote_total,
                local_total,
            });
        }

        let needed = remote_total - local_total;
        info!(account = %account, remote_total, local_total, needed, "Syncing new transfers");

        let run_id = self.start_run(account, SyncMode::Incremental).await;
        let mut progress = PageProgress::default();
        let result = self.pull_delta(account, needed, &mut progress).await;
        self.finish_run(run_id, remote_total, &progress, result.is_err())
            .await;
        result?;

        if progress.malformed > 0 {
            warn!(
                account = %account,
                malformed = progress.malformed,
                "Skipped feed entries that could not be decoded"
            );
        }

        if progress.short_page {
            warn!(
                account = %account,
                fetched = progress.fetched,
                needed,
                "Feed returned fewer records than its count claims"
            );
        }

        if progress.feed_error {
            warn!(account = %account, "Leaving checkpoint unchanged after feed error");
        } else {
            self.db
                .set_checkpoint(account, remote_total)
                .await
                .map_err(SyncError::Checkpoint)?;
        }

        info!(
            account = %account,
            fetched = progress.fetched,
            inserted = progress.inserted,
            "Incremental sync finished"
        );

        Ok(SyncOutcome::Synced {
            remote_total,
            fetched: progress.fetched,
            inserted: progress.inserted,
            complete: progress.consumed >= needed,
        })
    }

    /// Bootstrap pass: walk every page from the start until the feed runs
    /// dry. The checkpoint is written only once all pages are stored.
    pub async fn full_sync_account(&self, account: &str) -> Result<SyncOutcome, SyncError> {
        let remote_total = match self.feed.fetch_total_count(account).await {
            Ok(total) => Some(total),
            Err(e) => {
                warn!(account = %account, error = %e, "Could not fetch remote count before full sync");
                None
            }
        };
        info!(account = %account, remote_total = ?remote_total, "Starting full sync");

        let run_id = self.start_run(account, SyncMode::Full).await;
        let mut progress = PageProgress::default();
        let result = self.pull_all(account, &mut progress).await;
        self.finish_run(
            run_id,
            remote_total.unwrap_or(progress.fetched),
            &progress,
            result.is_err(),
        )
        .await;
        result?;

        if progress.malformed > 0 {
            warn!(
                account = %account,
                malformed = progress.malformed,
                "Skipped feed entries that could not be decoded"
            );
        }

        match remote_total {
            Some(total) if !progress.feed_error => {
                self.db
                    .set_checkpoint(account, total)
                    .await
                    .map_err(SyncError::Checkpoint)?;
            }
            _ => warn!(account = %account, "Full sync incomplete, checkpoint not written"),
        }

        info!(
            account = %account,
            fetched = progress.fetched,
            inserted = progress.inserted,
            "Full sync finished"
        );

        Ok(SyncOutcome::Synced {
            remote_total: remote_total.unwrap_or(progress.fetched),
            fetched: progress.fetched,
            inserted: progress.inserted,
            complete: !progress.feed_error,
        })
    }

    /// Page through the newest `needed` records.
    ///
    /// Every page is requested at full size so page offsets stay aligned;
    /// the last one is cut down to the remainder.
    async fn pull_delta(
        &self,
        account: &str,
        needed: u64,
        progress: &mut PageProgress,
    ) -> Result<(), SyncError> {
        let mut page: u64 = 0;

        while progress.consumed < needed {
            let want = (self.page_size as u64).min(needed - progress.consumed);
            let Some(raw) = self.fetch_page(account, page, progress).await else {
                break;
            };
            let received = raw.len() as u64;
            let kept = received.min(want);

            let records = to_records(raw.valid_prefix(kept as usize), account);
            progress.consumed += kept;
            progress.malformed += kept - records.len() as u64;
            self.store_page(account, page, &records, progress).await?;

            if received < want {
                progress.short_page = true;
                break;
            }
            page += 1;
        }

        Ok(())
    }

    /// Page through the whole feed until an empty or short page.
    async fn pull_all(&self, account: &str, progress: &mut PageProgress) -> Result<(), SyncError> {
        let mut page: u64 = 0;

        loop {
            let Some(raw) = self.fetch_page(account, page, progress).await else {
                break;
            };
            if raw.is_empty() {
                break;
            }
            let received = raw.len() as u64;

            let records = to_records(raw.valid_prefix(raw.len()), account);
            progress.consumed += received;
            progress.malformed += raw.malformed() as u64;
            self.store_page(account, page, &records, progress).await?;

            if received < self.page_size as u64 {
                break;
            }
            page += 1;
        }

        Ok(())
    }

    /// Fetch one page, turning feed errors into "no more pages".
    async fn fetch_page(
        &self,
        account: &str,
        page: u64,
        progress: &mut PageProgress,
    ) -> Option<TransferPage> {
        match self.feed.fetch_page(account, page, self.page_size).await {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!(
                    account = %account,
                    page,
                    timeout = e.is_timeout(),
                    error = %e,
                    "Page fetch failed, stopping this pass"
                );
                progress.feed_error = true;
                None
            }
        }
    }

    async fn store_page(
        &self,
        account: &str,
        page: u64,
        records: &[TransferRecord],
        progress: &mut PageProgress,
    ) -> Result<(), SyncError> {
        let inserted = self
            .db
            .insert_ignoring_duplicates(records)
            .await
            .map_err(SyncError::Ledger)?;

        progress.fetched += records.len() as u64;
        progress.inserted += inserted;
        debug!(
            account = %account,
            page,
            received = records.len(),
            inserted,
            "Stored page"
        );
        Ok(())
    }

    async fn warn_on_checkpoint_drift(&self, account: &str, remote_total: u64, local_total: u64) {
        match self.db.get_checkpoint(account).await {
            Ok(Some(checkpoint)) => {
                if checkpoint > local_total {
                    warn!(
                        account = %account,
                        checkpoint,
                        local_total,
                        "Checkpoint is ahead of local data"
                    );
                }
                if remote_total < checkpoint {
                    warn!(
                        account = %account,
                        checkpoint,
                        remote_total,
                        "Remote count went backwards"
                    );
                }
            }
            Ok(None) => debug!(account = %account, "No checkpoint yet"),
            Err(e) => warn!(account = %account, error = %e, "Failed to read checkpoint"),
        }
    }

    async fn start_run(&self, account: &str, mode: SyncMode) -> Option<i64> {
        match self.db.start_sync_run(account, mode).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(account = %account, error = %e, "Failed to record sync run start");
                None
            }
        }
    }

    async fn finish_run(
        &self,
        run_id: Option<i64>,
        remote_total: u64,
        progress: &PageProgress,
        failed: bool,
    ) {
        let Some(run_id) = run_id else {
            return;
        };
        let stats = SyncRunStats {
            remote_total,
            fetched: progress.fetched,
            inserted: progress.inserted,
            interrupted: failed || progress.feed_error,
        };
        if let Err(e) = self.db.complete_sync_run(run_id, &stats).await {
            warn!(run_id, error = %e, "Failed to record sync run completion");
        }
    }
}

/// Normalize one page's entries. Identical twins on a page get increasing
/// occurrence numbers so each keeps its own id.
fn to_records<'a>(
    raw: impl Iterator<Item = &'a RawTransfer>,
    account: &str,
) -> Vec<TransferRecord> {
    let mut seen: HashMap<&RawTransfer, u32> = HashMap::new();
    raw.map(|r| {
        let occurrence = seen.entry(r).or_insert(0);
        let record = TransferRecord::from_raw(r, account, *occurrence);
        *occurrence += 1;
        record
    })
    .collect()
}
