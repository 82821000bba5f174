//! Mirror-node REST client for historical topic messages.
//!
//! Backfill walks `GET /api/v1/topics/{id}/messages` pages in ascending
//! consensus order, following the opaque `links.next` continuation URL until
//! it runs out. The client is stateless and safe to share across topics.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use topicindex_core::error::IndexerError;
use topicindex_core::message::TopicMessage;
use topicindex_core::timestamp::ConsensusTimestamp;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One message as returned by the mirror REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorMessage {
    pub consensus_timestamp: String,
    pub topic_id: String,
    /// Payload bytes, base64-encoded as on the wire.
    pub message: String,
    #[serde(default)]
    pub payer_account_id: Option<String>,
    pub sequence_number: u64,
    #[serde(default)]
    pub running_hash: Option<String>,
    #[serde(default)]
    pub running_hash_version: Option<u32>,
    #[serde(default)]
    pub chunk_info: Option<Value>,
}

impl MirrorMessage {
    /// Convert the wire shape into the internal record, parsing the
    /// consensus timestamp.
    pub fn into_topic_message(self) -> Result<TopicMessage, IndexerError> {
        Ok(TopicMessage {
            consensus_timestamp: self.consensus_timestamp.parse()?,
            topic_id: self.topic_id,
            sequence_number: self.sequence_number,
            payer_account_id: self.payer_account_id,
            message_base64: self.message,
        })
    }
}

/// One page of mirror messages plus the continuation link, if any.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesPage {
    #[serde(default)]
    pub messages: Vec<MirrorMessage>,
    #[serde(default)]
    pub links: PageLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

/// REST access to a topic's message history.
#[async_trait]
pub trait MirrorApi: Send + Sync {
    /// Fetch one page of messages strictly after `cursor` (or from the
    /// beginning of the topic when `None`), in ascending consensus order.
    async fn fetch_messages(
        &self,
        topic_id: &str,
        cursor: Option<&ConsensusTimestamp>,
        limit: u32,
    ) -> Result<MessagesPage, IndexerError>;

    /// Follow a continuation URL verbatim.
    async fn fetch_next(&self, next: &str) -> Result<MessagesPage, IndexerError>;
}

/// Mirror REST client backed by `reqwest`.
pub struct MirrorRestClient {
    base_url: String,
    http: reqwest::Client,
}

impl MirrorRestClient {
    /// Create a client for the given mirror base URL (e.g.
    /// `https://mainnet.mirrornode.example.com`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, http }
    }

    async fn get_page(&self, path_or_url: &str) -> Result<MessagesPage, IndexerError> {
        let url = if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        };

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| IndexerError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::MirrorStatus {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<MessagesPage>()
            .await
            .map_err(|e| IndexerError::Transport(e.to_string()))
    }
}

/// Request path for a topic's message page.
pub(crate) fn messages_path(
    topic_id: &str,
    cursor: Option<&ConsensusTimestamp>,
    limit: u32,
) -> String {
    match cursor {
        Some(cursor) => format!(
            "/api/v1/topics/{topic_id}/messages?limit={limit}&timestamp=gt:{cursor}"
        ),
        None => format!("/api/v1/topics/{topic_id}/messages?limit={limit}"),
    }
}

#[async_trait]
impl MirrorApi for MirrorRestClient {
    async fn fetch_messages(
        &self,
        topic_id: &str,
        cursor: Option<&ConsensusTimestamp>,
        limit: u32,
    ) -> Result<MessagesPage, IndexerError> {
        self.get_page(&messages_path(topic_id, cursor, limit)).await
    }

    async fn fetch_next(&self, next: &str) -> Result<MessagesPage, IndexerError> {
        self.get_page(next).await
    }
}
