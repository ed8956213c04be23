use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use super::error::FeedError;
use super::types::{RawTransfer, TransferPage, TransfersResponse};
use super::TransferFeed;

/// Public Filfox API root.
pub const DEFAULT_API_URL: &str = "https://filfox.info/api/v1";

/// Largest page the explorer serves.
pub const MAX_PAGE_SIZE: u32 = 100;

/// HTTP client for the explorer's transfer endpoints.
#[derive(Clone)]
pub struct ExplorerClient {
    http_client: Client,
    base_url: String,
}

impl std::fmt::Debug for ExplorerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplorerClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ExplorerClient {
    /// Build a client with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FeedError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("filsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn transfers_url(&self, account: &str) -> String {
        format!(
            "{}/address/{}/transfers",
            self.base_url,
            urlencoding::encode(account)
        )
    }

    async fn get_transfers(
        &self,
        account: &str,
        page: u64,
        page_size: u32,
    ) -> Result<TransfersResponse, FeedError> {
        let url = self.transfers_url(account);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        debug!(account = %account, page, page_size, "GET {}", url);

        let response = self
            .http_client
            .get(&url)
            .query(&[("page", page.to_string()), ("pageSize", page_size.to_string())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        parse_response(&body)
    }
}

pub(crate) fn parse_response(body: &str) -> Result<TransfersResponse, FeedError> {
    Ok(serde_json::from_str(body)?)
}

pub(crate) fn transfers_of(response: TransfersResponse) -> Result<TransferPage, FeedError> {
    let entries = response
        .transfers
        .ok_or(FeedError::MissingField("transfers"))?;

    let entries = entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match serde_json::from_value::<RawTransfer>(entry) {
            Ok(transfer) => Some(transfer),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed transfer entry");
                None
            }
        })
        .collect();

    Ok(TransferPage::new(entries))
}

pub(crate) fn total_count_of(response: &TransfersResponse) -> Result<u64, FeedError> {
    response
        .total_count
        .ok_or(FeedError::MissingField("totalCount"))
}

#[async_trait::async_trait]
impl TransferFeed for ExplorerClient {
    async fn fetch_page(
        &self,
        account: &str,
        page: u64,
        page_size: u32,
    ) -> Result<TransferPage, FeedError> {
        let response = self.get_transfers(account, page, page_size).await?;
        transfers_of(response)
    }

    async fn fetch_total_count(&self, account: &str) -> Result<u64, FeedError> {
        let response = self.get_transfers(account, 0, 1).await?;
        total_count_of(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfers_url_trims_trailing_slash() {
        let client = ExplorerClient::new("https://example.test/api/v1/", Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            client.transfers_url("f01234"),
            "https://example.test/api/v1/address/f01234/transfers"
        );
    }

    #[test]
    fn test_transfers_url_escapes_account() {
        let client = ExplorerClient::new(DEFAULT_API_URL, Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.transfers_url("f0 1/2"),
            "https://filfox.info/api/v1/address/f0%201%2F2/transfers"
        );
    }

    #[test]
    fn test_parse_full_page() {
        let body = r#"{
            "totalCount": 2,
            "transfers": [
                {"height": 10, "timestamp": 100, "from": "a", "to": "b", "value": "1", "type": "send", "message": "m1"},
                {"height": 9, "timestamp": 90, "from": "c", "to": "a", "value": "2", "type": "receive", "message": "m2"}
            ]
        }"#;
        let response = parse_response(body).unwrap();
        assert_eq!(total_count_of(&response).unwrap(), 2);
        let page = transfers_of(response).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.malformed(), 0);
        let transfers: Vec<_> = page.valid_prefix(2).collect();
        assert_eq!(transfers[1].from, "c");
    }

    #[test]
    fn test_bad_entry_does_not_discard_page() {
        let body = r#"{
            "totalCount": 3,
            "transfers": [
                {"height": 10, "timestamp": 100, "from": "a", "to": "b", "value": "5", "type": "send"},
                {"height": 9, "timestamp": 90, "from": "c", "to": "a", "value": null, "type": "receive"},
                {"height": 8, "timestamp": 80, "from": "c", "value": "1", "type": "receive"}
            ]
        }"#;
        let page = transfers_of(parse_response(body).unwrap()).unwrap();
        assert_eq!(page.len(), 3);
        // Null value decodes (as zero later); the entry without `to` is kept
        // as a placeholder.
        assert_eq!(page.malformed(), 1);
        let transfers: Vec<_> = page.valid_prefix(3).collect();
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].value, "5");
        assert_eq!(transfers[1].value, "");
    }

    #[test]
    fn test_missing_transfers_is_typed_error() {
        let response = parse_response(r#"{"totalCount": 3}"#).unwrap();
        assert!(matches!(
            transfers_of(response),
            Err(FeedError::MissingField("transfers"))
        ));
    }

    #[test]
    fn test_missing_total_count_is_typed_error() {
        let response = parse_response(r#"{"transfers": []}"#).unwrap();
        assert!(matches!(
            total_count_of(&response),
            Err(FeedError::MissingField("totalCount"))
        ));
    }

    #[test]
    fn test_malformed_body_is_json_error() {
        assert!(matches!(
            parse_response("<html>rate limited</html>"),
            Err(FeedError::Json(_))
        ));
    }
}
