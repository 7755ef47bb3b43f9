use anyhow::{Context, Result};
use recorder_storage::{
    db, start_api_server, AnalyticsEngine, AnalyticsStore, AppState, BlobStore, Config,
    DeliveryResolver, MemoryAnalyticsStore, MemoryMetadataStore, MetadataStore,
    PgAnalyticsStore, PgMetadataStore, S3BlobStore, StoreBackend, UploadOrchestrator,
    UploadSettings,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Recorder Storage Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let (metadata_store, analytics_store) = build_stores(&config).await?;

    let blob_store: Arc<dyn BlobStore> = Arc::new(
        S3BlobStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 blob store")?,
    );

    let state = AppState {
        uploads: UploadOrchestrator::new(
            blob_store.clone(),
            metadata_store.clone(),
            UploadSettings {
                key_prefix: config.s3.key_prefix.clone(),
                content_type: config.s3.content_type.clone(),
                url_expiry: config.upload_url_expiry(),
            },
        ),
        delivery: DeliveryResolver::new(
            blob_store.clone(),
            config.s3.key_prefix.clone(),
            config.s3.content_type.clone(),
            config.delivery_url_expiry(),
            config.api.app_base_url.clone(),
        ),
        analytics: AnalyticsEngine::new(analytics_store),
        metadata_store,
        blob_store,
        key_prefix: config.s3.key_prefix.clone(),
        content_type: config.s3.content_type.clone(),
        max_upload_bytes: config.s3.max_upload_bytes,
    };

    let shutdown = CancellationToken::new();

    // Spawn API server task
    let api_config = config.api.clone();
    let api_shutdown = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(state, &api_config, api_shutdown).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Storage service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down storage service");
    shutdown.cancel();

    if let Err(e) = api_handle.await {
        warn!(error = %e, "API server task did not exit cleanly");
    }

    info!("Storage service stopped");

    Ok(())
}

/// Build the metadata and analytics stores for the configured backend
async fn build_stores(
    config: &Config,
) -> Result<(Arc<dyn MetadataStore>, Arc<dyn AnalyticsStore>)> {
    match config.database.backend {
        StoreBackend::Postgres => {
            let pool = db::connect(&config.database)
                .await
                .context("Failed to connect to PostgreSQL")?;

            if config.database.run_migrations {
                db::run_migrations(&pool)
                    .await
                    .context("Failed to run database migrations")?;
            }

            Ok((
                Arc::new(PgMetadataStore::new(pool.clone())),
                Arc::new(PgAnalyticsStore::new(pool)),
            ))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory stores, records are lost on restart");
            Ok((
                Arc::new(MemoryMetadataStore::new()),
                Arc::new(MemoryAnalyticsStore::new()),
            ))
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
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
