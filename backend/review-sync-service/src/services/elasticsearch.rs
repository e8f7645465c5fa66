use async_trait::async_trait;
use elasticsearch::{
    http::response::Response,
    http::transport::{BuildError, SingleNodeConnectionPool, TransportBuilder},
    indices::{IndicesCreateParts, IndicesExistsParts},
    Elasticsearch, IndexParts, UpdateParts,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use super::index_sink::IndexSink;
use crate::config::ElasticsearchConfig;
use crate::error::SinkError;
use crate::events::RowPayload;

#[derive(Debug, Error)]
pub enum ElasticsearchError {
    #[error("invalid Elasticsearch URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to build transport: {0}")]
    TransportBuild(#[from] BuildError),
    #[error("transport error: {0}")]
    Transport(#[from] elasticsearch::Error),
    #[error("unexpected status {status} from Elasticsearch: {body}")]
    Status { status: u16, body: String },
}

/// Review index writer.
///
/// Upserts go through the index API (full replace), merges through the update
/// API with `doc_as_upsert`, so both create the document when it is missing.
#[derive(Clone)]
pub struct ElasticsearchIndexSink {
    client: Elasticsearch,
    index: String,
    key_field: String,
}

impl ElasticsearchIndexSink {
    pub fn new(config: &ElasticsearchConfig, key_field: &str) -> Result<Self, ElasticsearchError> {
        let parsed = Url::parse(&config.url)?;
        let pool = SingleNodeConnectionPool::new(parsed);
        let transport = TransportBuilder::new(pool)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client: Elasticsearch::new(transport),
            index: config.index.clone(),
            key_field: key_field.to_string(),
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Create the review index if it does not exist yet.
    pub async fn ensure_index(&self) -> Result<(), ElasticsearchError> {
        let exists_response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[self.index.as_str()]))
            .send()
            .await?;

        if exists_response.status_code().is_success() {
            debug!(index = %self.index, "Review index already exists");
            return Ok(());
        }

        let mut properties = serde_json::Map::new();
        properties.insert(self.key_field.clone(), json!({ "type": "keyword" }));
        properties.insert("content".to_string(), json!({ "type": "text" }));

        let body = json!({
            "settings": {
                "number_of_shards": 3,
                "number_of_replicas": 1
            },
            "mappings": {
                "dynamic": true,
                "properties": properties
            }
        });

        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(&self.index))
            .body(body)
            .send()
            .await?;

        let status = response.status_code().as_u16();
        let body = if response.status_code().is_success() {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };

        match create_outcome(status, body)? {
            IndexCreation::Created => info!(index = %self.index, "Review index created"),
            IndexCreation::AlreadyExists => {
                debug!(index = %self.index, "Review index created concurrently")
            }
        }
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), ElasticsearchError> {
        let response = self.client.ping().send().await?;
        if response.status_code().is_success() {
            Ok(())
        } else {
            Err(ElasticsearchError::Status {
                status: response.status_code().as_u16(),
                body: "Elasticsearch health check failed".to_string(),
            })
        }
    }
}

#[async_trait]
impl IndexSink for ElasticsearchIndexSink {
    async fn upsert(&self, key: &str, fields: &RowPayload) -> Result<(), SinkError> {
        let response = self
            .client
            .index(IndexParts::IndexId(&self.index, key))
            .body(fields)
            .send()
            .await
            .map_err(transport_failure)?;

        check_response(response).await
    }

    async fn merge(&self, key: &str, fields: &RowPayload) -> Result<(), SinkError> {
        let response = self
            .client
            .update(UpdateParts::IndexId(&self.index, key))
            .retry_on_conflict(3)
            .body(json!({
                "doc": fields,
                "doc_as_upsert": true
            }))
            .send()
            .await
            .map_err(transport_failure)?;

        check_response(response).await
    }
}

fn transport_failure(err: elasticsearch::Error) -> SinkError {
    SinkError::IndexUnavailable(err.to_string())
}

async fn check_response(response: Response) -> Result<(), SinkError> {
    let status = response.status_code().as_u16();
    if response.status_code().is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, body))
}

/// Map a failed write's HTTP status onto the sink error taxonomy.
///
/// Timeouts, throttling and server errors may go away on their own; any other
#[derive(Debug, PartialEq, Eq)]
enum IndexCreation {
    Created,
    /// Another worker won the race.
    AlreadyExists,
}

fn create_outcome(status: u16, body: String) -> Result<IndexCreation, ElasticsearchError> {
    if (200..300).contains(&status) {
        Ok(IndexCreation::Created)
    } else if body.contains("resource_already_exists_exception") {
        Ok(IndexCreation::AlreadyExists)
    } else {
        Err(ElasticsearchError::Status { status, body })
    }
}

/// 4xx means the document itself was rejected, except a missing index.
pub(crate) fn classify_status(status: u16, body: String) -> SinkError {
    match status {
        408 | 429 | 500..=599 => SinkError::IndexUnavailable(format!("HTTP {status}: {body}")),
        404 if body.contains("index_not_found_exception") => {
            SinkError::IndexUnavailable(format!("HTTP {status}: {body}"))
        }
        _ => SinkError::InvalidDocument(format!("HTTP {status}: {body}")),
    }
}
