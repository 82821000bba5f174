//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Errors that can occur while ingesting a topic.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Mirror REST returned a non-2xx status.
    #[error("mirror HTTP {status}: {body}")]
    MirrorStatus { status: u16, body: String },

    /// Network-level REST failure (connect refused, timeout, malformed body).
    #[error("mirror transport error: {0}")]
    Transport(String),

    /// Push-stream failure (connect, frame decode, unexpected end of stream).
    #[error("stream error: {0}")]
    Stream(String),

    /// Database failure during the atomic projection unit.
    #[error("storage error: {0}")]
    Storage(String),

    /// A consensus timestamp that does not parse as `seconds.nanoseconds`.
    #[error("invalid consensus timestamp: {value}")]
    InvalidTimestamp { value: String },

    /// Invalid configuration detected at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Cooperative shutdown observed mid-pass.
    #[error("ingestion aborted: {reason}")]
    Aborted { reason: String },
}

impl IndexerError {
    /// Returns `true` if a supervisor should retry after this error.
    ///
    /// Every transport and storage failure is retryable: 4xx causes are fixed
    /// by the operator externally, and a failed projection transaction left
    /// the cursor behind so the message is simply reprocessed on the next
    /// pass. Only shutdown and configuration errors end the loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Aborted { .. } | Self::Config(_))
    }
}
