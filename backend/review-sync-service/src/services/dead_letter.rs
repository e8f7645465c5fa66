//! Dead letter sink for rows the worker gave up on.
//!
//! Rows that cannot be applied (no usable key, rejected by the index, or still
//! failing after the retry budget) are published here so they can be replayed
//! once the cause is fixed. Publishing is best effort: a failure is logged and
//! never blocks the partition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::DeadLetterError;
use crate::events::{Operation, PartitionId, Position, RowPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    MissingKey,
    Rejected,
    RetriesExhausted,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::MissingKey => "missing_key",
            DeadLetterReason::Rejected => "rejected",
            DeadLetterReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_key: Option<String>,
    pub reason: DeadLetterReason,
    pub operation: String,
    pub topic: String,
    pub partition: i32,
    pub position: Position,
    pub error: String,
    pub attempts: u32,
    pub row: RowPayload,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        source: &PartitionId,
        position: Position,
        operation: Operation,
        row: &RowPayload,
        reason: DeadLetterReason,
        error: String,
    ) -> Self {
        Self {
            document_key: None,
            reason,
            operation: operation.as_str().to_string(),
            topic: source.topic.clone(),
            partition: source.partition,
            position,
            error,
            attempts: 0,
            row: row.clone(),
            failed_at: Utc::now(),
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.document_key = Some(key.to_string());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Message key on the dead letter topic.
    pub fn record_key(&self) -> String {
        match &self.document_key {
            Some(key) => key.clone(),
            None => format!("{}-{}-{}", self.topic, self.partition, self.position),
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError>;
}

pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaDeadLetterSink {
    pub fn new(brokers: &str, topic: &str, timeout: Duration) -> Result<Self, DeadLetterError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| DeadLetterError::Publish(format!("failed to create producer: {e}")))?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        let payload = serde_json::to_string(record)?;
        let key = record.record_key();

        let delivery = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        match self.producer.send(delivery, self.timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    topic = %self.topic,
                    partition,
                    offset,
                    reason = record.reason.as_str(),
                    "Row sent to dead letter topic"
                );
                Ok(())
            }
            Err((e, _)) => Err(DeadLetterError::Publish(e.to_string())),
        }
    }
}
