use anyhow::{Context, Result};
use photobank::api::{start_api_server, AppState};
use photobank::auth::TokenVerifier;
use photobank::catalog::DynamoCatalogStore;
use photobank::collection::CollectionService;
use photobank::config::Config;
use photobank::labeler::RekognitionLabelDetector;
use photobank::object_store::S3ObjectStore;
use photobank::pipeline::IngestWorker;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting photobank service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize dependency objects; every component receives its
    // collaborators explicitly rather than reaching for process-wide handles.
    let object_store: Arc<S3ObjectStore> = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize object store")?,
    );

    let catalog = Arc::new(
        DynamoCatalogStore::new(&config.dynamodb, &config.s3.region)
            .await
            .context("Failed to initialize catalog store")?,
    );

    let detector = Arc::new(RekognitionLabelDetector::new(
        aws_sdk_rekognition::Client::new(
            &aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_config::Region::new(config.s3.region.clone()))
                .load()
                .await,
        ),
        &config.rekognition,
    ));

    // Key set is fetched once at startup; startup fails if the identity
    // provider is unreachable.
    let verifier = Arc::new(
        TokenVerifier::from_config(&config.auth)
            .await
            .context("Failed to fetch identity key set")?,
    );

    let collection = Arc::new(CollectionService::new(
        object_store.clone(),
        catalog.clone(),
    ));

    let ingest_worker = IngestWorker::new(
        &config.events,
        &config.s3.region,
        object_store.clone(),
        catalog.clone(),
        detector,
    )
    .await
    .context("Failed to initialize ingest worker")?;

    // Create API state
    let api_state = AppState {
        collection,
        objects: object_store,
        verifier,
    };

    // Spawn ingest worker task
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = ingest_worker.run().await {
            error!(error = %e, "Ingest worker error");
        }
    });

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Photobank service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down photobank service");

    // Abort tasks
    worker_handle.abort();
    api_handle.abort();

    info!("Photobank service stopped");

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
