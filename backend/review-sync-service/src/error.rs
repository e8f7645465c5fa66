use thiserror::Error;

/// A message payload that could not be turned into a change event.
///
/// Non-fatal: the worker logs it, skips the message and still advances the
/// partition position.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),
}

/// Failures reported by an index sink for a single document write.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// Transport or backend availability problem; worth retrying.
    #[error("search index unavailable: {0}")]
    IndexUnavailable(String),
    /// The document can never be stored as-is; retrying will not help.
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::IndexUnavailable(_))
    }
}

/// Failures reported by a message source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The transport hiccupped; the worker backs off and pulls again.
    #[error("transient message source error: {0}")]
    Transient(String),
    /// The transport is gone for good; the worker stops.
    #[error("message source failed: {0}")]
    Fatal(String),
}

impl From<rdkafka::error::KafkaError> for SourceError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        use rdkafka::error::KafkaError;

        match err {
            KafkaError::ClientCreation(_) | KafkaError::Subscription(_) | KafkaError::Canceled => {
                SourceError::Fatal(err.to_string())
            }
            other => SourceError::Transient(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("failed to serialize dead letter record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to publish dead letter record: {0}")]
    Publish(String),
}

/// Errors that terminate a sync worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("message source failed: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::error::KafkaError;
    use rdkafka::types::RDKafkaErrorCode;

    #[test]
    fn test_only_index_unavailable_is_retryable() {
        assert!(SinkError::IndexUnavailable("connection refused".into()).is_retryable());
        assert!(!SinkError::InvalidDocument("mapper_parsing_exception".into()).is_retryable());
    }

    #[test]
    fn test_kafka_error_classification() {
        let fatal: SourceError = KafkaError::ClientCreation("bad config".into()).into();
        assert!(matches!(fatal, SourceError::Fatal(_)));

        let transient: SourceError =
            KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure).into();
        assert!(matches!(transient, SourceError::Transient(_)));
    }
}
