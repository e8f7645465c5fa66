use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use review_sync_service::events::KafkaMessageSource;
use review_sync_service::metrics::{serve as serve_metrics, SyncMetrics};
use review_sync_service::services::{
    DeadLetterSink, ElasticsearchIndexSink, IndexSink, KafkaDeadLetterSink,
};
use review_sync_service::shutdown::ShutdownSignals;
use review_sync_service::{SyncConfig, SyncWorker};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEAD_LETTER_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = SyncConfig::from_env().context("invalid configuration")?;

    info!(
        brokers = %config.kafka.brokers,
        topic = %config.kafka.topic,
        group_id = %config.kafka.group_id,
        index = %config.elasticsearch.index,
        workers = config.workers,
        "Starting review sync service"
    );

    let search = ElasticsearchIndexSink::new(&config.elasticsearch, &config.worker.document_key)
        .context("failed to build Elasticsearch client")?;

    if let Err(e) = search.health_check().await {
        warn!(error = %e, "Elasticsearch health check failed; writes will be retried");
    }
    if config.elasticsearch.ensure_index {
        if let Err(e) = search.ensure_index().await {
            warn!(index = search.index(), error = %e, "Failed to ensure search index");
        }
    }
    let sink: Arc<dyn IndexSink> = Arc::new(search);

    let dead_letters: Option<Arc<dyn DeadLetterSink>> = match &config.dead_letter_topic {
        Some(topic) => {
            let producer =
                KafkaDeadLetterSink::new(&config.kafka.brokers, topic, DEAD_LETTER_TIMEOUT)
                    .context("failed to create dead letter producer")?;
            info!(topic = %topic, "Dead letter topic enabled");
            Some(Arc::new(producer) as Arc<dyn DeadLetterSink>)
        }
        None => {
            info!("No dead letter topic configured; given-up rows are only logged");
            None
        }
    };

    let metrics = SyncMetrics::new(prometheus::default_registry())
        .context("failed to register metrics")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut signals = ShutdownSignals::install().context("failed to install signal handlers")?;

    let metrics_server = config.metrics_addr.map(|addr| {
        let registry = prometheus::default_registry().clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(addr, registry, shutdown).await {
                error!(%addr, error = %e, "Metrics endpoint failed");
            }
        })
    });

    let mut handles = Vec::with_capacity(config.workers);
    for id in 0..config.workers {
        let source = KafkaMessageSource::new(&config.kafka)
            .with_context(|| format!("failed to create consumer for worker {id}"))?;

        let mut worker = SyncWorker::new(
            id,
            source,
            sink.clone(),
            config.worker.clone(),
            metrics.clone(),
            shutdown_rx.clone(),
        );
        if let Some(dead_letters) = &dead_letters {
            worker = worker.with_dead_letters(dead_letters.clone());
        }

        handles.push(tokio::spawn(async move { worker.run().await }));
    }

    tokio::spawn(async move {
        match signals.recv().await {
            Ok(signal) => info!(signal, "Shutdown signal received; draining workers"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    let mut failed = 0usize;
    for (id, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(worker = id, error = %e, "Sync worker failed");
                failed += 1;
            }
            Err(e) => {
                error!(worker = id, error = %e, "Sync worker panicked");
                failed += 1;
            }
        }
    }

    if let Some(server) = metrics_server {
        server.abort();
    }

    if failed > 0 {
        anyhow::bail!("{failed} sync worker(s) stopped with an error");
    }

    info!("Review sync service stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("review_sync_service=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
