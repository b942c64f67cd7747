use anyhow::{Context, Result};
use image_ingest::cache::UploadCache;
use image_ingest::config::{IngestConfig, LoggingConfig};
use image_ingest::notifier::HttpNotifier;
use image_ingest::storage::S3ObjectStore;
use image_ingest::{FileProcessor, IngestPipeline};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load configuration
    let config = IngestConfig::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        watch_dir = %config.watch.dir.display(),
        "Starting image ingest service"
    );

    // Missing configuration is fatal; there is no degraded mode.
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    // Collaborators
    let store = Arc::new(S3ObjectStore::new(&config.storage).await);
    info!(
        bucket = store.bucket(),
        event_id = %config.upload.event_id,
        "Object store ready"
    );
    let notifier = Arc::new(
        HttpNotifier::new(&config.notify).context("Failed to initialize notification client")?,
    );

    let cache = match &config.cache.url {
        Some(url) => Some(
            UploadCache::connect(url)
                .await
                .context("Failed to connect to cache")?,
        ),
        None => {
            warn!("No cache URL configured, running without cache");
            None
        }
    };

    let processor = FileProcessor::new(
        store,
        notifier,
        config.upload.event_id.clone(),
        config.upload.user_id.clone(),
        config.watch.settle_interval(),
    );

    let running = IngestPipeline::new(config.watch.clone(), processor)
        .start()
        .await
        .context("Failed to start ingest pipeline")?;

    info!("Image ingest service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down image ingest service");

    let stats = running.shutdown().await;

    if let Some(cache) = cache {
        cache.close().await;
    }

    info!(
        completed = stats.completed,
        peak_in_flight = stats.peak_in_flight,
        "Image ingest service stopped"
    );

    Ok(())
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).context("Invalid log level")?,
    };

    let filter = filter
        .add_directive("aws_config=warn".parse()?)
        .add_directive("aws_smithy_runtime=warn".parse()?)
        .add_directive("hyper=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "pretty" {
        subscriber.with(fmt::layer().pretty()).init();
    } else {
        subscriber.with(fmt::layer().json()).init();
    }

    Ok(())
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
