use thiserror::Error;

/// Errors from the explorer API.
///
/// The sync engine soft-fails on every variant; they exist so logs can say
/// *why* a page came back empty.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Response missing expected field: {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    /// Whether the error is a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FeedError::Http(e) if e.is_timeout())
    }
}
