mod api;
mod config;
mod debounce;
mod dispatcher;
mod ingress;
mod merge_buffer;
mod model;
mod mqtt_listener;
mod photo_index;
mod photo_writer;
mod reconciler;
mod webhook;

use anyhow::{Context, Result};
use api::AppState;
use config::Config;
use dispatcher::{BridgeStats, Dispatcher};
use ingress::Ingress;
use mqtt_listener::MqttListener;
use photo_index::PhotoIndex;
use photo_writer::PhotoWriter;
use reconciler::Reconciler;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webhook::WebhookSink;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Emcampo reconciliation bridge"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Photo directory is created once here, not per write
    let writer = PhotoWriter::new(&config.storage.photos_dir)
        .await
        .context("Failed to prepare photo directory")?;
    let photos_root = writer.root().to_path_buf();

    // The photo record store is optional; deployments without the legacy
    // database simply leave it unconfigured
    let index = match &config.database {
        Some(db) => Some(
            PhotoIndex::connect(db)
                .await
                .context("Failed to connect to photo record store")?,
        ),
        None => {
            info!("Photo record store disabled (no database configured)");
            None
        }
    };

    let reconciler = Reconciler::new(
        writer,
        index,
        config.merge.filename_policy,
        config.merge.public_base_url.clone(),
    );

    let sink = Arc::new(WebhookSink::new(&config.webhook).context("Failed to build webhook client")?);

    let stats = Arc::new(BridgeStats::default());

    // Broker connect is fatal at startup; reconnects are handled in run()
    let (event_tx, event_rx) = mpsc::channel(config.mqtt.event_channel_capacity);
    let listener = MqttListener::connect(&config.mqtt, Ingress::new(&config.topics), event_tx)
        .await
        .context("Failed to connect to MQTT broker")?;

    let dispatcher = Dispatcher::new(
        event_rx,
        config.debounce(),
        config.photo_ttl(),
        reconciler,
        sink,
        stats.clone(),
    );

    // Spawn listener task
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!(error = %e, "MQTT listener error");
        }
    });

    // Spawn dispatcher task
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    // Spawn API server task
    let api_state = AppState {
        stats: stats.clone(),
        service_name: config.service.name.clone(),
    };
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_state, photos_root, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Bridge started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down bridge");

    // Abort tasks
    listener_handle.abort();
    dispatcher_handle.abort();
    api_handle.abort();

    info!("Bridge stopped");

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
