use serde::{Deserialize, Deserializer};

/// One transfer entry as returned by `/address/{account}/transfers`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct RawTransfer {
    pub from: String,
    pub to: String,
    /// Amount in attoFIL. The explorer sends a string; some mirrors send a
    /// bare number. A null or missing value is kept as an empty string and
    /// normalized to zero later.
    #[serde(default, deserialize_with = "lenient_value")]
    pub value: String,
    pub height: u64,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One page of the feed, in feed order.
///
/// Entries that could not be decoded stay in place as `None` so the page
/// length, and with it positional paging, matches what the explorer served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPage {
    entries: Vec<Option<RawTransfer>>,
}

impl TransferPage {
    pub fn new(entries: Vec<Option<RawTransfer>>) -> Self {
        Self { entries }
    }

    /// Number of entries served, decodable or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn malformed(&self) -> usize {
        self.entries.iter().filter(|e| e.is_none()).count()
    }

    /// Decoded transfers among the first `n` entries.
    pub fn valid_prefix(&self, n: usize) -> impl Iterator<Item = &RawTransfer> {
        self.entries.iter().take(n).flatten()
    }
}

impl From<Vec<RawTransfer>> for TransferPage {
    fn from(transfers: Vec<RawTransfer>) -> Self {
        Self::new(transfers.into_iter().map(Some).collect())
    }
}

/// Response body of the transfers endpoint.
///
/// Both fields are optional at the serde level so that a body lacking them
/// can be reported as [`super::FeedError::MissingField`] rather than a
/// generic JSON error. Entries are decoded one by one so a single bad entry
/// does not take its page-mates down with it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransfersResponse {
    pub total_count: Option<u64>,
    pub transfers: Option<Vec<serde_json::Value>>,
}

fn lenient_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_transfer() {
        let json = r#"{
            "height": 3000000,
            "timestamp": 1690000000,
            "message": "bafy2bzaceabc",
            "from": "f01234",
            "fromTag": {"name": "miner"},
            "to": "f1xyz",
            "value": "1500000000000000000",
            "type": "send"
        }"#;
        let t: RawTransfer = serde_json::from_str(json).unwrap();
        assert_eq!(t.height, 3_000_000);
        assert_eq!(t.value, "1500000000000000000");
        assert_eq!(t.kind.as_deref(), Some("send"));
        assert_eq!(t.message.as_deref(), Some("bafy2bzaceabc"));
    }

    #[test]
    fn test_deserialize_transfer_without_type_or_message() {
        let json = r#"{"height": 1, "timestamp": 2, "from": "a", "to": "b", "value": 7}"#;
        let t: RawTransfer = serde_json::from_str(json).unwrap();
        assert_eq!(t.value, "7");
        assert!(t.kind.is_none());
        assert!(t.message.is_none());
    }

    #[test]
    fn test_deserialize_transfer_with_null_or_missing_value() {
        let json = r#"{"height": 1, "timestamp": 2, "from": "a", "to": "b", "value": null}"#;
        let t: RawTransfer = serde_json::from_str(json).unwrap();
        assert_eq!(t.value, "");
        assert!(crate::amount::to_decimal(&t.value).is_zero());

        let json = r#"{"height": 1, "timestamp": 2, "from": "a", "to": "b"}"#;
        let t: RawTransfer = serde_json::from_str(json).unwrap();
        assert_eq!(t.value, "");
    }

    #[test]
    fn test_page_keeps_positions_of_malformed_entries() {
        let good = RawTransfer {
            from: "a".into(),
            to: "b".into(),
            value: "1".into(),
            height: 1,
            timestamp: 2,
            kind: None,
            message: None,
        };
        let page = TransferPage::new(vec![None, Some(good.clone()), None]);
        assert_eq!(page.len(), 3);
        assert_eq!(page.malformed(), 2);
        assert_eq!(page.valid_prefix(1).count(), 0);
        assert_eq!(page.valid_prefix(2).collect::<Vec<_>>(), vec![&good]);
    }

    #[test]
    fn test_deserialize_response_missing_transfers() {
        let r: TransfersResponse = serde_json::from_str(r#"{"totalCount": 5}"#).unwrap();
        assert_eq!(r.total_count, Some(5));
        assert!(r.transfers.is_none());
    }
}
