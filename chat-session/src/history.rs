//! One-shot loading of a user's stored conversation.

use async_trait::async_trait;
use reqwest::Client;
use shared::{endpoints, ApiClientConfig, Credential, HistoryEntry};
use tracing::{debug, warn};

use crate::error::HistoryError;
use crate::timeline::MessageDraft;

/// Source of prior conversation history
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch the stored conversation for `credential`, oldest first.
    async fn load(&self, credential: &Credential) -> Result<Vec<HistoryEntry>, HistoryError>;
}

/// History loader backed by `GET /api/chat/history/{identity}`
pub struct HttpHistoryLoader {
    client: Client,
    config: ApiClientConfig,
}

impl HttpHistoryLoader {
    pub fn new(api_base: &str) -> Self {
        Self {
            client: Client::new(),
            config: ApiClientConfig::new(api_base),
        }
    }
}

#[async_trait]
impl HistorySource for HttpHistoryLoader {
    async fn load(&self, credential: &Credential) -> Result<Vec<HistoryEntry>, HistoryError> {
        let url = self.config.url(&endpoints::chat_history(credential.identity()));
        debug!("Loading history from {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.token())
            .send()
            .await
            .map_err(|e| HistoryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::Server {
                status: status.as_u16(),
            });
        }

        response
            .json::<Vec<HistoryEntry>>()
            .await
            .map_err(|e| HistoryError::Parse(e.to_string()))
    }
}

/// Validate history entries, dropping the ones whose role we cannot display.
pub fn to_drafts(entries: Vec<HistoryEntry>) -> Vec<MessageDraft> {
    entries
        .into_iter()
        .filter_map(|entry| match entry.line() {
            Ok(line) => Some(MessageDraft::from(line)),
            Err(e) => {
                warn!("Skipping history entry: {}", e);
                None
            }
        })
        .collect()
}
