use anyhow::{Context, Result};
use image_service::api::{start_api_server, AppState};
use image_service::blob_store::{BlobKeyLayout, BlobStore, S3BlobStore};
use image_service::config::{Backend, Config};
use image_service::memory::{InMemoryBlobStore, InMemoryMetadataStore};
use image_service::metadata_store::{MetadataStore, PgMetadataStore};
use image_service::orchestrator::ImageService;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, info_span, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level)?;

    info!(
        service = %config.service.name,
        backend = ?config.images.backend,
        "Starting image service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let (blobs, metadata) = init_stores(&config).await?;

    let images = ImageService::new(
        blobs,
        metadata,
        config.access_link_ttl(),
        config.images.default_content_type.clone(),
        info_span!("image_service", service = %config.service.name),
    );

    start_api_server(AppState { images }, &config.api, shutdown_signal())
        .await
        .context("API server failed")?;

    info!("Image service stopped");

    Ok(())
}

/// Build the blob and metadata stores for the configured backend
async fn init_stores(config: &Config) -> Result<(Arc<dyn BlobStore>, Arc<dyn MetadataStore>)> {
    let layout = BlobKeyLayout::new(
        config.images.key_prefix.clone(),
        config.images.key_extension.clone(),
    );

    match config.images.backend {
        Backend::Aws => {
            let s3 = config.s3.as_ref().context("Missing s3 configuration")?;
            let database = config
                .database
                .as_ref()
                .context("Missing database configuration")?;

            let metadata = PgMetadataStore::new(database)
                .await
                .context("Failed to initialize metadata store")?;

            if database.run_migrations {
                metadata
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }

            let blobs: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(s3, layout).await);
            let metadata: Arc<dyn MetadataStore> = Arc::new(metadata);

            Ok((blobs, metadata))
        }
        Backend::Memory => {
            warn!("Using in-memory stores, images will not survive a restart");
            let blobs: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new(layout));
            let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());

            Ok((blobs, metadata))
        }
    }
}

/// Install the process-wide tracing subscriber; fails if one is already set
fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutting down image service");
}
