//! topicindex-hcs — mirror-node clients and the ingestion engine.
//!
//! Two ways into a topic, one way out:
//!
//! ```text
//! MirrorRestClient (historical pages)  ─┐
//!                                       ├─→ TopicSupervisor ─→ ProjectionStore
//! WsTopicStream    (live push frames)  ─┘         │
//!                                                 └─ IngestionManager (one per process)
//! ```
//!
//! The supervisor runs backfill to completion, hands off to the push stream,
//! and falls back to reconnect-with-backoff on any failure. The manager owns
//! one supervisor per topic and coordinates startup, runtime topic
//! registration, and graceful shutdown.

pub mod manager;
pub mod rest;
pub mod stream;
pub mod supervisor;

pub use manager::IngestionManager;
pub use rest::{MessagesPage, MirrorApi, MirrorMessage, MirrorRestClient};
pub use stream::{MessageStream, TopicStream, WsTopicStream};
pub use supervisor::TopicSupervisor;
