//! Remote transfer feed: the block explorer's paginated transfer history.
//!
//! The engine talks to the feed only through [`TransferFeed`], so tests can
//! script pages without a network.

mod client;
mod error;
mod types;

pub use client::{ExplorerClient, DEFAULT_API_URL, MAX_PAGE_SIZE};
pub use error::FeedError;
pub use types::{RawTransfer, TransferPage};

/// Paginated, append-only transfer history of an account.
///
/// Ordering precondition: pages are returned newest-first and the order is
/// stable between calls, so the first `n` records of the feed are always the
/// `n` most recent transfers. Reconciliation is positional and relies on it.
#[async_trait::async_trait]
pub trait TransferFeed: Send + Sync {
    /// Fetch page `page` (0-based) of at most `page_size` transfers.
    ///
    /// Entries that fail to decode stay in the page as placeholders.
    async fn fetch_page(
        &self,
        account: &str,
        page: u64,
        page_size: u32,
    ) -> Result<TransferPage, FeedError>;

    /// Total number of transfers the feed holds for `account`.
    async fn fetch_total_count(&self, account: &str) -> Result<u64, FeedError>;
}
