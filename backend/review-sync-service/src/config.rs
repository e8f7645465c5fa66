use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use resilience::RetryConfig;

use crate::error::ConfigError;

const DEFAULT_METRICS_PORT: u16 = 9102;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub kafka: KafkaConfig,
    pub elasticsearch: ElasticsearchConfig,
    pub worker: WorkerConfig,
    /// Number of workers (each with its own consumer in the group)
    pub workers: usize,
    /// Dead letter topic; when unset, given-up rows are only logged and counted
    pub dead_letter_topic: Option<String>,
    /// Where `/metrics` is served; `None` when set to `off`
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    pub topic: String,
    pub auto_offset_reset: String,
}

#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    pub url: String,
    pub index: String,
    /// Create the index on startup when missing
    pub ensure_index: bool,
    pub request_timeout: Duration,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index: "reviews".to_string(),
            ensure_index: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-worker apply policy.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Row field holding the document key
    pub document_key: String,
    /// Only apply events from these tables; empty means every table
    pub tables: Vec<String>,
    /// Retry policy for rows that hit an unavailable index
    pub retry: RetryConfig,
    /// Upper bound on a single index write
    pub apply_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            document_key: "review_id".to_string(),
            tables: Vec::new(),
            retry: RetryConfig::default(),
            apply_timeout: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    pub fn accepts_table(&self, table: &str) -> bool {
        self.tables.is_empty() || self.tables.iter().any(|t| t == table)
    }
}

impl SyncConfig {
    /// Load configuration from the environment (and `.env` when present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let or = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let brokers = var("KAFKA_BROKERS").ok_or(ConfigError::Missing("KAFKA_BROKERS"))?;

        let defaults = WorkerConfig::default();
        let retry_defaults = RetryConfig::default();

        let retry = RetryConfig {
            max_retries: parse(&var, "REVIEW_SYNC_MAX_RETRIES", retry_defaults.max_retries)?,
            initial_backoff: Duration::from_millis(parse(
                &var,
                "REVIEW_SYNC_INITIAL_BACKOFF_MS",
                retry_defaults.initial_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse(
                &var,
                "REVIEW_SYNC_MAX_BACKOFF_MS",
                retry_defaults.max_backoff.as_millis() as u64,
            )?),
            ..retry_defaults
        };

        let workers: usize = parse(&var, "REVIEW_SYNC_WORKERS", 1)?;
        if workers == 0 {
            return Err(ConfigError::Invalid {
                name: "REVIEW_SYNC_WORKERS",
                value: "0".to_string(),
            });
        }

        let metrics_addr = match var("REVIEW_SYNC_METRICS_ADDR") {
            Some(raw) if raw.trim().eq_ignore_ascii_case("off") => None,
            Some(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "REVIEW_SYNC_METRICS_ADDR",
                value: raw.clone(),
            })?),
            None => Some(SocketAddr::from(([0, 0, 0, 0], DEFAULT_METRICS_PORT))),
        };

        Ok(Self {
            kafka: KafkaConfig {
                brokers,
                group_id: or("KAFKA_REVIEW_SYNC_GROUP_ID", "review-sync-service"),
                topic: or("KAFKA_REVIEW_TOPIC", "review-binlog"),
                auto_offset_reset: or("KAFKA_AUTO_OFFSET_RESET", "earliest"),
            },
            elasticsearch: ElasticsearchConfig {
                url: or("ELASTICSEARCH_URL", "http://localhost:9200"),
                index: or("ELASTICSEARCH_REVIEW_INDEX", "reviews"),
                ensure_index: parse(&var, "ELASTICSEARCH_ENSURE_INDEX", true)?,
                ..ElasticsearchConfig::default()
            },
            worker: WorkerConfig {
                document_key: or("REVIEW_SYNC_DOCUMENT_KEY", defaults.document_key.as_str()),
                tables: var("REVIEW_SYNC_TABLES")
                    .map(|raw| {
                        raw.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                retry,
                apply_timeout: Duration::from_millis(parse(
                    &var,
                    "REVIEW_SYNC_APPLY_TIMEOUT_MS",
                    defaults.apply_timeout.as_millis() as u64,
                )?),
            },
            workers,
            dead_letter_topic: var("REVIEW_SYNC_DLQ_TOPIC"),
            metrics_addr,
        })
    }
}

fn parse<T, V>(var: &V, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}
