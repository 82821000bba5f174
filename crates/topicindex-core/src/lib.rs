//! topicindex-core — foundation for the consensus-topic ingestion engine.
//!
//! # Architecture
//!
//! ```text
//! IngestionManager → TopicSupervisor (one per topic)
//!                        ├── MirrorApi       (historical REST backfill)
//!                        ├── TopicStream     (live push subscription)
//!                        ├── MessageParser   (decode / classify / validate)
//!                        ├── ReconnectPolicy (exponential backoff)
//!                        └── ProjectionStore (atomic record + project + cursor)
//! ```
//!
//! This crate holds the pieces with no I/O: the wire and event types, the
//! parser pipeline, the cursor, and the supervisor's policy types. The
//! concrete clients, the supervisor loop, and the storage backends live in
//! `topicindex-hcs` and `topicindex-storage`.

pub mod backoff;
pub mod cursor;
pub mod error;
pub mod events;
pub mod indexer;
pub mod message;
pub mod parser;
pub mod timestamp;

pub use backoff::ReconnectPolicy;
pub use cursor::TopicCursor;
pub use error::IndexerError;
pub use events::TopicEvent;
pub use indexer::{IngestConfig, IngestMetrics, SupervisorPhase, SupervisorStatus};
pub use message::{MessageKind, ParsedMessage, TopicMessage};
pub use parser::MessageParser;
pub use timestamp::ConsensusTimestamp;
