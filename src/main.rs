use anyhow::{Context, Result};
use forkwatch::config::Config;
use forkwatch::indexer::Indexer;
use forkwatch::metrics::PrometheusMetrics;
use forkwatch::service::ForkChoiceService;
use forkwatch::{source, store};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(service = %config.service.name, "Starting forkwatch");

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let frame_store: Arc<dyn forkwatch::FrameStore> = Arc::from(
        store::from_config(&config.store)
            .await
            .context("Failed to initialize frame store")?,
    );

    let indexer = Indexer::new(&config.indexer)
        .await
        .context("Failed to initialize indexer")?;

    if config.indexer.run_migrations {
        indexer
            .run_migrations()
            .await
            .context("Failed to run index migrations")?;
    }

    let mut sources = Vec::with_capacity(config.sources.len());
    for source_config in &config.sources {
        sources.push(
            source::from_config(source_config, &config.ethereum)
                .context("Failed to initialize source")?,
        );
    }

    let service = Arc::new(ForkChoiceService::new(
        sources,
        frame_store,
        indexer,
        Arc::new(PrometheusMetrics),
        config.retention_period(),
        config.purge_interval(),
    ));

    let shutdown = CancellationToken::new();

    service
        .start(shutdown.clone())
        .await
        .context("Failed to start service")?;

    info!("Forkwatch started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down forkwatch");

    shutdown.cancel();
    service.stop().await;

    info!("Forkwatch stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
