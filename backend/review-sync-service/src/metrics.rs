use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Counters shared by every sync worker in the process.
#[derive(Clone)]
pub struct SyncMetrics {
    /// Messages by outcome: applied, decode_failed, schema_change, filtered,
    /// empty, abandoned
    pub messages_total: IntCounterVec,
    /// Rows by operation and outcome: applied, missing_key, rejected,
    /// retries_exhausted
    pub rows_total: IntCounterVec,
    /// Index writes retried after a transient failure
    pub index_retries_total: IntCounter,
    /// Offset commit requests by outcome: ok, failed. The Kafka source commits
    /// asynchronously, so `ok` means the broker request was queued.
    pub commits_total: IntCounterVec,
    /// Errors returned by the message source
    pub source_errors_total: IntCounter,
    /// Dead letter publishes by outcome: ok, failed
    pub dead_letters_total: IntCounterVec,
}

impl SyncMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages_total = IntCounterVec::new(
            Opts::new(
                "review_sync_messages_total",
                "Change stream messages handled by outcome",
            ),
            &["outcome"],
        )?;
        let rows_total = IntCounterVec::new(
            Opts::new("review_sync_rows_total", "Changed rows handled by outcome"),
            &["operation", "outcome"],
        )?;
        let index_retries_total = IntCounter::new(
            "review_sync_index_retries_total",
            "Index writes retried after a transient failure",
        )?;
        let commits_total = IntCounterVec::new(
            Opts::new(
                "review_sync_commits_total",
                "Offset commit requests accepted by the consumer (async, unconfirmed) by outcome",
            ),
            &["outcome"],
        )?;
        let source_errors_total = IntCounter::new(
            "review_sync_source_errors_total",
            "Errors returned by the change stream consumer",
        )?;
        let dead_letters_total = IntCounterVec::new(
            Opts::new(
                "review_sync_dead_letters_total",
                "Rows published to the dead letter topic by outcome",
            ),
            &["outcome"],
        )?;

        for metric in [
            Box::new(messages_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(rows_total.clone()),
            Box::new(index_retries_total.clone()),
            Box::new(commits_total.clone()),
            Box::new(source_errors_total.clone()),
            Box::new(dead_letters_total.clone()),
        ] {
            registry.register(metric)?;
        }

        Ok(Self {
            messages_total,
            rows_total,
            index_retries_total,
            commits_total,
            source_errors_total,
            dead_letters_total,
        })
    }

    /// Metrics on a private registry, for tests and tools.
    pub fn unregistered() -> Self {
        Self::new(&Registry::new()).expect("fresh registry accepts sync metrics")
    }

    pub fn message(&self, outcome: &str) {
        self.messages_total.with_label_values(&[outcome]).inc();
    }

    pub fn row(&self, operation: &str, outcome: &str) {
        self.rows_total.with_label_values(&[operation, outcome]).inc();
    }
}

/// Render every metric family in `registry` in the Prometheus text format.
pub fn encode(registry: &Registry) -> Result<Vec<u8>, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

async fn metrics_handler(State(registry): State<Registry>) -> Response {
    match encode(&registry) {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(registry)
}

/// Serve `/metrics` until shutdown is signalled.
pub async fn serve(
    addr: SocketAddr,
    registry: Registry,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Metrics endpoint listening");

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}
