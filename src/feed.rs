use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One transaction as delivered by the aggregation feed.
/// Sign convention: positive = money leaving the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedTransaction {
    pub external_id: String,
    pub date: String,
    pub description: String,
    #[serde(default)]
    pub original_description: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub pending: bool,
    /// Set when this posted transaction replaces a previously-delivered
    /// pending one.
    #[serde(default)]
    pub pending_external_id: Option<String>,
}

impl FeedTransaction {
    /// Raw bank text wins over the aggregator's cleaned-up name.
    pub fn ledger_description(&self) -> &str {
        self.original_description.as_deref().unwrap_or(&self.description)
    }

    pub fn ledger_merchant(&self) -> &str {
        self.merchant.as_deref().unwrap_or(&self.description)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRemoval {
    pub external_id: String,
}

/// One page of incremental changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedPage {
    #[serde(default)]
    pub added: Vec<FeedTransaction>,
    #[serde(default)]
    pub modified: Vec<FeedTransaction>,
    #[serde(default)]
    pub removed: Vec<FeedRemoval>,
    pub next_cursor: String,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Error, Debug)]
pub enum FeedError {
    /// The feed mutated underneath our pagination; the cursor is no longer
    /// valid and the sync must restart from an empty cursor.
    #[error("cursor invalidated by concurrent mutation")]
    MutationConflict,

    /// The linked credential is no longer valid; the account must be
    /// re-linked before syncing again.
    #[error("re-authentication required: {0}")]
    LoginRequired(String),

    #[error("feed transport error: {0}")]
    Transport(String),

    #[error("malformed feed response: {0}")]
    Malformed(String),
}

/// The aggregation feed, abstracted so sync can run against a stub in tests
/// and against the HTTP service in production.
pub trait TransactionFeed {
    fn sync_page(
        &self,
        access_token: &str,
        cursor: &str,
        account_filter: Option<&str>,
    ) -> Result<FeedPage, FeedError>;
}

#[derive(Serialize)]
struct SyncRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    cursor: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    account_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

/// HTTP client for the aggregation feed's `/transactions/sync` endpoint.
pub struct HttpFeed {
    base_url: String,
    client_id: String,
    secret: String,
    client: reqwest::blocking::Client,
}

impl HttpFeed {
    pub fn new(base_url: &str, client_id: &str, secret: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            secret: secret.to_string(),
            client,
        }
    }
}

impl TransactionFeed for HttpFeed {
    fn sync_page(
        &self,
        access_token: &str,
        cursor: &str,
        account_filter: Option<&str>,
    ) -> Result<FeedPage, FeedError> {
        let url = format!("{}/transactions/sync", self.base_url);
        let body = SyncRequest {
            client_id: &self.client_id,
            secret: &self.secret,
            access_token,
            cursor,
            account_id: account_filter,
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err: ErrorBody = resp.json().unwrap_or(ErrorBody {
                error_code: String::new(),
                error_message: format!("HTTP {status}"),
            });
            return Err(match err.error_code.as_str() {
                "TRANSACTIONS_SYNC_MUTATION_DURING_PAGINATION" => FeedError::MutationConflict,
                "ITEM_LOGIN_REQUIRED" => FeedError::LoginRequired(err.error_message),
                _ => FeedError::Transport(format!("{status}: {}", err.error_message)),
            });
        }

        resp.json::<FeedPage>()
            .map_err(|e| FeedError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_deserializes_with_missing_fields() {
        let page: FeedPage = serde_json::from_str(r#"{"next_cursor": "abc"}"#).unwrap();
        assert!(page.added.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, "abc");
    }

    #[test]
    fn test_ledger_description_prefers_original() {
        let txn: FeedTransaction = serde_json::from_str(
            r#"{
                "external_id": "ext-1",
                "date": "2025-03-01",
                "description": "Coffee Shop",
                "original_description": "COFFEE SHOP #55 AUSTIN TX",
                "amount": 4.75
            }"#,
        )
        .unwrap();
        assert_eq!(txn.ledger_description(), "COFFEE SHOP #55 AUSTIN TX");
        assert_eq!(txn.ledger_merchant(), "Coffee Shop");
        assert!(!txn.pending);
        assert!(txn.pending_external_id.is_none());
    }
}
