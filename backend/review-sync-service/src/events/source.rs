use crate::error::SourceError;
use async_trait::async_trait;
use std::fmt;

/// Independently ordered slice of the change stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId {
    pub topic: String,
    pub partition: i32,
}

impl PartitionId {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// Position of a message within its partition.
pub type Position = i64;

/// One message pulled from the change stream.
#[derive(Debug, Clone)]
pub struct SourceMessage {
    pub partition: PartitionId,
    pub position: Position,
    /// `None` for tombstones and other empty records.
    pub payload: Option<Vec<u8>>,
}

/// Durable, partitioned, replayable log the sync worker consumes from.
///
/// `pull` must be safe to drop while pending: the worker races it against the
/// shutdown signal and abandons it on cancellation.
#[async_trait]
pub trait MessageSource: Send {
    async fn pull(&mut self) -> Result<SourceMessage, SourceError>;

    /// Persist `position` as fully processed for `partition`.
    ///
    /// Implementations may only queue the commit; `close` must then make it
    /// durable.
    async fn commit(&mut self, partition: &PartitionId, position: Position) -> Result<(), SourceError>;

    /// Flush anything still pending before the worker returns.
    async fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}
