mod config;
mod legacy_text;
mod publisher;
mod source;

use anyhow::{Context, Result};
use config::Config;
use publisher::CatalogPublisher;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions};
use source::CatalogSource;
use std::time::Duration;
use tokio::signal;
use tokio::time::timeout;
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
        "Starting Emcampo catalog republisher"
    );

    let source = CatalogSource::connect(&config.database)
        .await
        .context("Failed to connect to catalog database")?;

    let (client, eventloop) = connect_mqtt(&config).await?;

    // Publishes go nowhere unless the event loop keeps turning
    let eventloop_handle = tokio::spawn(drive_eventloop(eventloop));

    let publisher = CatalogPublisher::new(client, config.catalog.topic_prefix.clone());

    let mut interval = tokio::time::interval(config.refresh_interval());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!(
        interval_secs = config.catalog.refresh_interval_secs,
        "Catalog service started"
    );

    // First tick fires immediately, so the catalog is republished at startup
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match refresh(&source, &publisher).await {
                    Ok(topics) => info!(topics, "Catalog republished"),
                    Err(e) => error!(error = %e, "Catalog refresh failed"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down catalog service");
                break;
            }
        }
    }

    eventloop_handle.abort();

    info!("Catalog service stopped");

    Ok(())
}

/// One refresh: fetch, group by instrument type, republish retained
async fn refresh(source: &CatalogSource, publisher: &CatalogPublisher) -> Result<usize> {
    let records = source.fetch().await?;
    let groups = source::group_by_type(records);
    let topics = publisher.publish_groups(&groups).await?;
    Ok(topics)
}

/// Connect to the broker, failing startup if no CONNACK arrives in time
async fn connect_mqtt(config: &Config) -> Result<(AsyncClient, rumqttc::EventLoop)> {
    let mqtt = &config.mqtt;
    let mut options = MqttOptions::new(&mqtt.client_id, &mqtt.host, mqtt.port);
    options.set_keep_alive(Duration::from_secs(mqtt.keep_alive_secs));

    if let (Some(username), Some(password)) = (&mqtt.username, &mqtt.password) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 16);

    timeout(config.mqtt_connect_timeout(), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(anyhow::anyhow!("broker connection failed: {}", e)),
            }
        }
    })
    .await
    .context("No CONNACK from broker within the connect timeout")??;

    info!(host = %mqtt.host, port = mqtt.port, "Connected to MQTT broker");

    Ok((client, eventloop))
}

/// Keep the MQTT event loop turning; the client reconnects on poll errors
async fn drive_eventloop(mut eventloop: rumqttc::EventLoop) {
    loop {
        if let Err(e) = eventloop.poll().await {
            error!(error = %e, "MQTT connection lost, retrying");
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
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
