//! Live push subscription to the substrate's streaming endpoint.
//!
//! `WsTopicStream` opens a WebSocket per subscription, sends a subscribe
//! frame, and forwards delivered messages through a bounded channel. The
//! channel is the backpressure boundary: when the consumer falls behind, the
//! forwarding task blocks on `send` and the socket stops being read.
//!
//! The subscriber never retries. Any transport failure, frame decode
//! failure, or end of stream surfaces exactly once as a terminal `Err` item;
//! reconnecting is the supervisor's job. Dropping the stream closes the
//! connection, so no further items are delivered after a stop.

use std::pin::Pin;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use topicindex_core::error::IndexerError;
use topicindex_core::message::TopicMessage;
use topicindex_core::timestamp::ConsensusTimestamp;

/// A live, ordered stream of topic messages. Ends only on terminal failure.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<TopicMessage, IndexerError>> + Send>>;

/// Push-subscription access to a topic.
#[async_trait]
pub trait TopicStream: Send + Sync {
    /// Subscribe to every message with consensus timestamp strictly after
    /// `start` (or the whole topic when `None`).
    ///
    /// Implementations add one nanosecond to the supplied start, because the
    /// substrate's `gt`/`gte` semantics are inconsistent across providers:
    /// with the bump, the worst case is re-excluding a message we already
    /// hold, never skipping one we don't.
    async fn subscribe(
        &self,
        topic_id: &str,
        start: Option<ConsensusTimestamp>,
    ) -> Result<MessageStream, IndexerError>;
}

/// Subscribe request sent after the connection is established.
#[derive(Debug, Serialize)]
struct SubscribeFrame<'a> {
    topic_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
}

/// One delivered message frame.
#[derive(Debug, Deserialize)]
struct MessageFrame {
    topic_id: String,
    consensus_timestamp: String,
    sequence_number: u64,
    #[serde(default)]
    payer_account_id: Option<String>,
    /// Payload bytes, base64-encoded.
    contents: String,
}

/// WebSocket-backed topic stream.
pub struct WsTopicStream {
    endpoint: String,
}

impl WsTopicStream {
    /// Create a stream client for the given WebSocket endpoint
    /// (`ws://` or `wss://`).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

/// The start timestamp actually sent on the wire: supplied start plus one
/// nanosecond.
pub(crate) fn wire_start(start: Option<ConsensusTimestamp>) -> Option<String> {
    start.map(|ts| ts.plus_nanos(1).to_string())
}

fn decode_frame(text: &str) -> Result<TopicMessage, IndexerError> {
    let frame: MessageFrame = serde_json::from_str(text)
        .map_err(|e| IndexerError::Stream(format!("bad frame: {e}")))?;
    Ok(TopicMessage {
        consensus_timestamp: frame.consensus_timestamp.parse()?,
        topic_id: frame.topic_id,
        sequence_number: frame.sequence_number,
        payer_account_id: frame.payer_account_id,
        message_base64: frame.contents,
    })
}

#[async_trait]
impl TopicStream for WsTopicStream {
    async fn subscribe(
        &self,
        topic_id: &str,
        start: Option<ConsensusTimestamp>,
    ) -> Result<MessageStream, IndexerError> {
        let (ws, _) = connect_async(&self.endpoint)
            .await
            .map_err(|e| IndexerError::Stream(format!("connect {}: {e}", self.endpoint)))?;

        let subscribe = SubscribeFrame {
            topic_id,
            start_time: wire_start(start),
        };
        let subscribe = serde_json::to_string(&subscribe)
            .map_err(|e| IndexerError::Stream(e.to_string()))?;

        debug!(topic = %topic_id, endpoint = %self.endpoint, "subscribing");

        let (mut sink, mut read) = ws.split();
        sink.send(Message::Text(subscribe.into()))
            .await
            .map_err(|e| IndexerError::Stream(format!("subscribe send: {e}")))?;

        // Bounded: a slow consumer blocks this task, which stops reading the
        // socket and pushes backpressure onto the stream.
        let (mut tx, rx) = mpsc::channel::<Result<TopicMessage, IndexerError>>(512);

        tokio::spawn(async move {
            // Keep the write half alive for the connection's lifetime.
            let _sink = sink;
            while let Some(item) = read.next().await {
                let forward = match item {
                    Ok(Message::Text(text)) => Some(decode_frame(text.as_str())),
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
                    Ok(Message::Binary(_)) => {
                        Some(Err(IndexerError::Stream("unexpected binary frame".into())))
                    }
                    Ok(Message::Close(_)) => {
                        Some(Err(IndexerError::Stream("stream closed by server".into())))
                    }
                    Err(e) => Some(Err(IndexerError::Stream(e.to_string()))),
                };

                if let Some(item) = forward {
                    let terminal = item.is_err();
                    if tx.send(item).await.is_err() {
                        // Consumer stopped; drop the connection quietly.
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
            }
            // The server hung up without a close frame.
            warn!("push stream ended unexpectedly");
            let _ = tx
                .send(Err(IndexerError::Stream("unexpected end of stream".into())))
                .await;
        });

        Ok(Box::pin(rx))
    }
}
