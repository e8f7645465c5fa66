//! In-memory message source, index and dead letter sink for driving a
//! `SyncWorker` without Kafka or Elasticsearch.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use resilience::RetryConfig;
use review_sync_service::config::WorkerConfig;
use review_sync_service::error::DeadLetterError;
use review_sync_service::events::{
    FieldValue, MessageSource, PartitionId, Position, RowPayload, SourceMessage,
};
use review_sync_service::services::{DeadLetterRecord, DeadLetterSink, IndexSink};
use review_sync_service::{SinkError, SourceError};
use serde_json::{json, Value};
use tokio::sync::watch;

pub const TOPIC: &str = "review-binlog";

pub fn partition(n: i32) -> PartitionId {
    PartitionId::new(TOPIC, n)
}

/// Canal-style change event payload.
pub fn canal(kind: &str, table: &str, rows: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": kind,
        "database": "review",
        "table": table,
        "isDdl": false,
        "data": rows,
    }))
    .unwrap()
}

pub fn ddl(table: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "ALTER",
        "database": "review",
        "table": table,
        "isDdl": true,
        "data": null,
        "sql": "ALTER TABLE review_info ADD COLUMN score INT",
    }))
    .unwrap()
}

pub fn message(partition_no: i32, position: Position, payload: Vec<u8>) -> SourceMessage {
    SourceMessage {
        partition: partition(partition_no),
        position,
        payload: Some(payload),
    }
}

/// Worker settings with retry delays short enough for tests.
pub fn fast_config() -> WorkerConfig {
    WorkerConfig {
        retry: RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        apply_timeout: Duration::from_secs(1),
        ..WorkerConfig::default()
    }
}

#[derive(Default)]
struct SourceState {
    queue: VecDeque<Result<SourceMessage, SourceError>>,
    commits: Vec<(PartitionId, Position)>,
    failing_commits: usize,
    closed: bool,
}

/// Scripted message source. Once the queue is empty `pull` pends forever,
/// after optionally flipping the shutdown switch handed to `stop_when_drained`.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<SourceState>>,
    on_drained: Option<Arc<watch::Sender<bool>>>,
}

impl MemorySource {
    pub fn new(messages: impl IntoIterator<Item = SourceMessage>) -> Self {
        let source = Self::default();
        for message in messages {
            source.push(message);
        }
        source
    }

    pub fn stop_when_drained(mut self, shutdown: watch::Sender<bool>) -> Self {
        self.on_drained = Some(Arc::new(shutdown));
        self
    }

    pub fn push(&self, message: SourceMessage) {
        self.state.lock().unwrap().queue.push_back(Ok(message));
    }

    pub fn push_error(&self, err: SourceError) {
        self.state.lock().unwrap().queue.push_back(Err(err));
    }

    /// Fail the next `n` commits.
    pub fn fail_commits(&self, n: usize) {
        self.state.lock().unwrap().failing_commits = n;
    }

    /// Successful commits in call order.
    pub fn commits(&self) -> Vec<(PartitionId, Position)> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn committed(&self, partition: &PartitionId) -> Option<Position> {
        self.commits()
            .into_iter()
            .filter(|(p, _)| p == partition)
            .map(|(_, position)| position)
            .last()
    }

    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn pull(&mut self) -> Result<SourceMessage, SourceError> {
        let next = self.state.lock().unwrap().queue.pop_front();
        match next {
            Some(next) => next,
            None => {
                if let Some(shutdown) = &self.on_drained {
                    let _ = shutdown.send(true);
                }
                std::future::pending().await
            }
        }
    }

    async fn commit(&mut self, partition: &PartitionId, position: Position) -> Result<(), SourceError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(SourceError::Transient("commit rejected: rebalance in progress".into()));
        }
        state.commits.push((partition.clone(), position));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Upsert(String),
    Merge(String),
}

#[derive(Default)]
struct IndexState {
    docs: HashMap<String, BTreeMap<String, FieldValue>>,
    calls: Vec<Call>,
    failures: HashMap<String, VecDeque<SinkError>>,
    broken: HashMap<String, SinkError>,
}

/// Search index kept in a map. Failures can be scripted per document key.
#[derive(Clone, Default)]
pub struct MemoryIndex {
    state: Arc<Mutex<IndexState>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next calls for `key` with `errors`, in order.
    pub fn fail_next(&self, key: &str, errors: impl IntoIterator<Item = SinkError>) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(key.to_string())
            .or_default()
            .extend(errors);
    }

    /// Fail every call for `key`.
    pub fn fail_always(&self, key: &str, error: SinkError) {
        self.state.lock().unwrap().broken.insert(key.to_string(), error);
    }

    pub fn seed(&self, key: &str, row: RowPayload) {
        self.state
            .lock()
            .unwrap()
            .docs
            .insert(key.to_string(), row.fields().clone());
    }

    pub fn doc(&self, key: &str) -> Option<BTreeMap<String, FieldValue>> {
        self.state.lock().unwrap().docs.get(key).cloned()
    }

    pub fn field(&self, key: &str, field: &str) -> Option<FieldValue> {
        self.doc(key).and_then(|doc| doc.get(field).cloned())
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().docs.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn scripted_failure(state: &mut IndexState, key: &str) -> Option<SinkError> {
        if let Some(err) = state.broken.get(key) {
            return Some(err.clone());
        }
        state.failures.get_mut(key).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl IndexSink for MemoryIndex {
    async fn upsert(&self, key: &str, fields: &RowPayload) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Upsert(key.to_string()));
        if let Some(err) = Self::scripted_failure(&mut state, key) {
            return Err(err);
        }
        state.docs.insert(key.to_string(), fields.fields().clone());
        Ok(())
    }

    async fn merge(&self, key: &str, fields: &RowPayload) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Merge(key.to_string()));
        if let Some(err) = Self::scripted_failure(&mut state, key) {
            return Err(err);
        }
        let doc = state.docs.entry(key.to_string()).or_default();
        for (field, value) in fields.fields() {
            doc.insert(field.clone(), value.clone());
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryDeadLetters {
    records: Arc<Mutex<Vec<DeadLetterRecord>>>,
}

impl MemoryDeadLetters {
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
