//! Change stream to search index sync loop.
//!
//! One worker consumes the partitions its message source is assigned and
//! processes them strictly in order:
//!
//! ```text
//! Idle → Fetching → Decoding → Applying → Committing → Idle
//!                      │                      ▲
//!                      └── undecodable / DDL ─┘
//! ```
//!
//! A message's position is committed only once every row in it has been
//! applied or given up on. Given-up rows are logged, counted and optionally
//! dead-lettered; they never stall the partition. Redelivery after a crash is
//! safe because index upserts and merges are idempotent.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use resilience::{with_retry_if, with_timeout_or, RetryError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{SinkError, SourceError, WorkerError};
use crate::events::{
    decode, ChangeEvent, MessageSource, Operation, PartitionId, Position, RowPayload,
    SourceMessage,
};
use crate::metrics::SyncMetrics;
use crate::offset::OffsetTracker;
use crate::services::{DeadLetterReason, DeadLetterRecord, DeadLetterSink, IndexSink};

const MAX_SOURCE_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetching,
    Decoding,
    Applying,
    Committing,
    Draining,
    Stopped,
}

/// What happened to a message once the worker was done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageOutcome {
    /// Every row was handled; the position may be committed.
    Processed,
    /// Shutdown interrupted the message; leave it for redelivery.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Applied,
    GivenUp,
    Cancelled,
}

pub struct SyncWorker<S> {
    id: usize,
    source: S,
    sink: Arc<dyn IndexSink>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    offsets: OffsetTracker,
    config: WorkerConfig,
    metrics: SyncMetrics,
    shutdown: watch::Receiver<bool>,
    state: WorkerState,
    consecutive_source_errors: u32,
    /// Partitions whose latest commit did not go through
    uncommitted: HashSet<PartitionId>,
}

impl<S: MessageSource> SyncWorker<S> {
    pub fn new(
        id: usize,
        source: S,
        sink: Arc<dyn IndexSink>,
        config: WorkerConfig,
        metrics: SyncMetrics,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            source,
            sink,
            dead_letters: None,
            offsets: OffsetTracker::new(),
            config,
            metrics,
            shutdown,
            state: WorkerState::Idle,
            consecutive_source_errors: 0,
            uncommitted: HashSet::new(),
        }
    }

    pub fn with_dead_letters(mut self, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn offsets(&self) -> &OffsetTracker {
        &self.offsets
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Consume until shutdown is signalled or the source fails for good.
    ///
    /// Shutdown is not an error. Either way the worker drains before
    /// returning: failed commits are retried and the source is closed.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        info!(worker = self.id, "Sync worker started");

        let result = self.consume().await;
        if let Err(err) = &result {
            error!(worker = self.id, error = %err, "Sync worker stopping on fatal error");
        }

        self.drain().await;
        result
    }

    async fn consume(&mut self) -> Result<(), WorkerError> {
        loop {
            self.transition(WorkerState::Idle);
            if self.shutdown_requested() {
                return Ok(());
            }

            self.transition(WorkerState::Fetching);
            let pulled = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut self.shutdown) => return Ok(()),
                pulled = self.source.pull() => pulled,
            };

            match pulled {
                Ok(message) => {
                    self.consecutive_source_errors = 0;
                    self.process(message).await;
                }
                Err(SourceError::Transient(reason)) => {
                    self.metrics.source_errors_total.inc();
                    self.consecutive_source_errors += 1;
                    let backoff = source_backoff(self.consecutive_source_errors);

                    warn!(
                        worker = self.id,
                        consecutive_errors = self.consecutive_source_errors,
                        backoff_secs = backoff.as_secs(),
                        "Message source error (will retry with backoff): {}",
                        reason
                    );

                    tokio::select! {
                        biased;
                        _ = shutdown_signalled(&mut self.shutdown) => return Ok(()),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(fatal) => {
                    self.metrics.source_errors_total.inc();
                    return Err(fatal.into());
                }
            }
        }
    }

    async fn process(&mut self, message: SourceMessage) {
        let SourceMessage {
            partition,
            position,
            payload,
        } = message;

        self.transition(WorkerState::Decoding);

        let outcome = match payload.as_deref().map(decode) {
            None => {
                debug!(%partition, position, "Empty change stream record");
                self.metrics.message("empty");
                MessageOutcome::Processed
            }
            Some(Err(err)) => {
                warn!(%partition, position, error = %err, "Skipping undecodable change event");
                self.metrics.message("decode_failed");
                MessageOutcome::Processed
            }
            Some(Ok(event)) if event.is_schema_change => {
                debug!(
                    %partition,
                    position,
                    database = %event.database,
                    table = %event.table,
                    "Skipping DDL change event"
                );
                self.metrics.message("schema_change");
                MessageOutcome::Processed
            }
            Some(Ok(event)) if !self.config.accepts_table(&event.table) => {
                debug!(%partition, position, table = %event.table, "Skipping change event for unsynced table");
                self.metrics.message("filtered");
                MessageOutcome::Processed
            }
            Some(Ok(event)) => self.apply_event(&partition, position, &event).await,
        };

        match outcome {
            MessageOutcome::Processed => self.commit(&partition, position).await,
            MessageOutcome::Abandoned => {
                info!(
                    %partition,
                    position,
                    "Shutdown during apply; message left uncommitted for redelivery"
                );
                self.metrics.message("abandoned");
            }
        }
    }

    async fn apply_event(
        &mut self,
        partition: &PartitionId,
        position: Position,
        event: &ChangeEvent,
    ) -> MessageOutcome {
        self.transition(WorkerState::Applying);

        let mut given_up = 0usize;
        for row in &event.rows {
            if self.shutdown_requested() {
                return MessageOutcome::Abandoned;
            }

            match self.apply_row(partition, position, event.operation, row).await {
                RowOutcome::Applied => {}
                RowOutcome::GivenUp => given_up += 1,
                RowOutcome::Cancelled => return MessageOutcome::Abandoned,
            }
        }

        debug!(
            %partition,
            position,
            operation = %event.operation,
            table = %event.table,
            rows = event.rows.len(),
            given_up,
            "Applied change event"
        );
        self.metrics.message("applied");
        MessageOutcome::Processed
    }

    async fn apply_row(
        &self,
        partition: &PartitionId,
        position: Position,
        operation: Operation,
        row: &RowPayload,
    ) -> RowOutcome {
        let key = match row.document_key(&self.config.document_key) {
            Ok(key) => key,
            Err(err) => {
                warn!(%partition, position, error = %err, "Skipping row without a usable document key");
                self.metrics.row(operation.as_str(), "missing_key");
                self.dead_letter(DeadLetterRecord::new(
                    partition,
                    position,
                    operation,
                    row,
                    DeadLetterReason::MissingKey,
                    err.to_string(),
                ))
                .await;
                return RowOutcome::GivenUp;
            }
        };

        let sink: &dyn IndexSink = self.sink.as_ref();
        let doc_key: &str = &key;
        let apply_timeout = self.config.apply_timeout;
        let mut calls = 0u32;

        let result = with_retry_if(
            &self.config.retry,
            SinkError::is_retryable,
            shutdown_signalled_owned(self.shutdown.clone()),
            || {
                calls += 1;
                with_timeout_or(apply_timeout, write(sink, operation, doc_key, row), |e| {
                    SinkError::IndexUnavailable(e.to_string())
                })
            },
        )
        .await;

        if calls > 1 {
            self.metrics.index_retries_total.inc_by(u64::from(calls - 1));
        }

        let (reason, attempts, err) = match result {
            Ok(()) => {
                self.metrics.row(operation.as_str(), "applied");
                return RowOutcome::Applied;
            }
            Err(RetryError::Cancelled { attempts, last }) => {
                debug!(%partition, position, key = %key, attempts, error = %last, "Row retry cancelled by shutdown");
                return RowOutcome::Cancelled;
            }
            Err(RetryError::Permanent { attempts, last }) => {
                warn!(%partition, position, key = %key, error = %last, "Index rejected document; skipping row");
                self.metrics.row(operation.as_str(), "rejected");
                (DeadLetterReason::Rejected, attempts, last)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(
                    %partition,
                    position,
                    key = %key,
                    attempts,
                    error = %last,
                    "Index still unavailable after retries; giving up on row"
                );
                self.metrics.row(operation.as_str(), "retries_exhausted");
                (DeadLetterReason::RetriesExhausted, attempts, last)
            }
        };

        self.dead_letter(
            DeadLetterRecord::new(partition, position, operation, row, reason, err.to_string())
                .with_key(&key)
                .with_attempts(attempts),
        )
        .await;
        RowOutcome::GivenUp
    }

    async fn commit(&mut self, partition: &PartitionId, position: Position) {
        self.transition(WorkerState::Committing);

        self.offsets.record_processed(partition, position);
        let Some(commit_point) = self.offsets.commit_point(partition) else {
            return;
        };

        match self.source.commit(partition, commit_point).await {
            Ok(()) => {
                self.metrics.commits_total.with_label_values(&["ok"]).inc();
                self.uncommitted.remove(partition);
            }
            Err(err) => {
                warn!(%partition, position = commit_point, error = %err, "Failed to commit offset");
                self.metrics.commits_total.with_label_values(&["failed"]).inc();
                self.uncommitted.insert(partition.clone());
            }
        }
    }

    async fn drain(&mut self) {
        self.transition(WorkerState::Draining);

        let outstanding: Vec<PartitionId> = self.uncommitted.drain().collect();
        for partition in outstanding {
            if let Some(position) = self.offsets.commit_point(&partition) {
                match self.source.commit(&partition, position).await {
                    Ok(()) => self.metrics.commits_total.with_label_values(&["ok"]).inc(),
                    Err(err) => {
                        warn!(%partition, position, error = %err, "Offset commit failed during drain");
                        self.metrics.commits_total.with_label_values(&["failed"]).inc();
                    }
                }
            }
        }

        if let Err(err) = self.source.close().await {
            warn!(worker = self.id, error = %err, "Failed to close message source cleanly");
        }

        for (partition, position) in self.offsets.partitions() {
            info!(worker = self.id, %partition, position, "Final commit point");
        }

        self.transition(WorkerState::Stopped);
        info!(worker = self.id, "Sync worker stopped");
    }

    async fn dead_letter(&self, record: DeadLetterRecord) {
        let Some(dead_letters) = &self.dead_letters else {
            return;
        };

        match dead_letters.publish(&record).await {
            Ok(()) => self.metrics.dead_letters_total.with_label_values(&["ok"]).inc(),
            Err(err) => {
                error!(
                    topic = %record.topic,
                    partition = record.partition,
                    position = record.position,
                    error = %err,
                    "Failed to dead-letter row"
                );
                self.metrics.dead_letters_total.with_label_values(&["failed"]).inc();
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn transition(&mut self, next: WorkerState) {
        if self.state != next {
            debug!(worker = self.id, from = ?self.state, to = ?next, "Worker state change");
            self.state = next;
        }
    }
}

async fn write(
    sink: &dyn IndexSink,
    operation: Operation,
    key: &str,
    row: &RowPayload,
) -> Result<(), SinkError> {
    match operation {
        Operation::Insert => sink.upsert(key, row).await,
        Operation::Update => sink.merge(key, row).await,
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn shutdown_signalled_owned(mut shutdown: watch::Receiver<bool>) {
    shutdown_signalled(&mut shutdown).await;
}

/// Exponential backoff for consecutive source errors: 1s, 2s, 4s, ... 60s.
fn source_backoff(consecutive_errors: u32) -> Duration {
    let secs = 2u64
        .saturating_pow(consecutive_errors.saturating_sub(1))
        .min(MAX_SOURCE_BACKOFF_SECS);
    Duration::from_secs(secs)
}
