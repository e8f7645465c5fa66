use crate::error::SinkError;
use crate::events::RowPayload;
use async_trait::async_trait;
use std::sync::Arc;

/// Applies single document mutations to the search index.
///
/// Both operations must be idempotent: repeating a call with the same key and
/// fields leaves the index in the state a single call would. Redelivered
/// messages rely on this.
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Create the document or replace it entirely.
    async fn upsert(&self, key: &str, fields: &RowPayload) -> Result<(), SinkError>;

    /// Create the document or overwrite only the supplied fields.
    async fn merge(&self, key: &str, fields: &RowPayload) -> Result<(), SinkError>;
}

#[async_trait]
impl<T: IndexSink + ?Sized> IndexSink for Arc<T> {
    async fn upsert(&self, key: &str, fields: &RowPayload) -> Result<(), SinkError> {
        (**self).upsert(key, fields).await
    }

    async fn merge(&self, key: &str, fields: &RowPayload) -> Result<(), SinkError> {
        (**self).merge(key, fields).await
    }
}
