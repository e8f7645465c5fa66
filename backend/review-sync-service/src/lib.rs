//! Keeps the review search index in step with the review database's change
//! stream.
//!
//! Canal-style JSON change events are pulled from Kafka, decoded, and applied
//! to Elasticsearch as idempotent upserts or partial merges. Partition offsets
//! are committed only after a message is fully handled, so delivery is at
//! least once.

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod offset;
pub mod services;
pub mod shutdown;
pub mod worker;

pub use config::SyncConfig;
pub use error::{DecodeError, SinkError, SourceError, WorkerError};
pub use offset::OffsetTracker;
pub use worker::{SyncWorker, WorkerState};
