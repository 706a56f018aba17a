use anyhow::{Context, Result};
use flow_archiver::config::ServiceConfig;
use flow_archiver::ingest::run_ingest;
use flow_archiver::{Config, FlowArchiver, FlowDirectionClassifier, S3ObjectStore};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_observability(&config.service)?;

    info!(service = %config.service.name, "Starting flow archiver");

    // A bad range must stop startup
    let classifier = FlowDirectionClassifier::new(&config.classifier.internal_ranges)
        .context("Failed to build flow classifier")?;
    info!(ranges = ?classifier.ranges(), "Flow classifier initialized");

    let store = S3ObjectStore::new(&config.object_store).await;

    let archiver = FlowArchiver::new(
        Arc::new(classifier),
        Arc::new(store),
        config.object_store.bucket.clone(),
        config.archive.clone(),
    );

    let summary = run_ingest(
        &archiver,
        BufReader::new(tokio::io::stdin()),
        config.archive.batch_size,
        shutdown_signal(),
    )
    .await
    .context("Failed to read flow input")?;

    info!(
        flows = summary.flows,
        skipped = summary.skipped,
        batches = summary.batches,
        "Flow archiver stopped"
    );

    Ok(())
}

/// JSON logs filtered by `RUST_LOG` (falling back to the configured level),
/// plus the Prometheus exporter
fn init_observability(service: &ServiceConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&service.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], service.metrics_port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = service.metrics_port, "Prometheus metrics exporter started");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM; ingest then flushes and exits
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };

    info!(signal, "Received shutdown signal");
}
