use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use super::source::{MessageSource, PartitionId, Position, SourceMessage};
use crate::config::KafkaConfig;
use crate::error::SourceError;

/// Kafka-backed change stream.
///
/// Auto-commit is disabled: offsets move only when the worker commits a fully
/// processed message. Commits go out asynchronously and are re-sent
/// synchronously on [`MessageSource::close`].
pub struct KafkaMessageSource {
    consumer: Arc<StreamConsumer>,
    pending: HashMap<PartitionId, Position>,
}

impl KafkaMessageSource {
    pub fn new(config: &KafkaConfig) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "Kafka change stream consumer initialized"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            pending: HashMap::new(),
        })
    }

    fn commit_list(
        offsets: impl IntoIterator<Item = (PartitionId, Position)>,
    ) -> Result<TopicPartitionList, SourceError> {
        let mut tpl = TopicPartitionList::new();
        for (partition, position) in offsets {
            // Kafka stores the next offset to read, not the last one processed.
            tpl.add_partition_offset(
                &partition.topic,
                partition.partition,
                Offset::Offset(position + 1),
            )?;
        }
        Ok(tpl)
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    async fn pull(&mut self) -> Result<SourceMessage, SourceError> {
        let record = self.consumer.recv().await?;

        Ok(SourceMessage {
            partition: PartitionId::new(record.topic(), record.partition()),
            position: record.offset(),
            payload: record.payload().map(<[u8]>::to_vec),
        })
    }

    async fn commit(&mut self, partition: &PartitionId, position: Position) -> Result<(), SourceError> {
        let tpl = Self::commit_list([(partition.clone(), position)])?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        self.pending.insert(partition.clone(), position);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let tpl = Self::commit_list(self.pending.drain())?;
        let consumer = Arc::clone(&self.consumer);

        // Synchronous commits block on the broker round-trip.
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| SourceError::Fatal(format!("commit task failed: {e}")))??;

        debug!("Flushed pending Kafka offsets");
        Ok(())
    }
}
