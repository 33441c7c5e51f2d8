//! MQTT transport wrapper.
//!
//! Owns the rumqttc event loop. Startup is gated on the first CONNACK so a
//! broker that cannot be reached at boot fails the service; transient loss
//! afterwards is absorbed here with the client's reconnect, re-subscribing
//! on every new CONNACK. Classified events flow to the dispatcher over a
//! bounded channel.

use crate::config::MqttConfig;
use crate::ingress::{Ingress, IngressEvent};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info};

/// Delay before polling again after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Errors that can occur on the broker transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("broker connection failed: {0}")]
    Connect(String),

    #[error("no CONNACK from broker within {0:?}")]
    ConnectTimeout(Duration),

    #[error("subscription failed: {0}")]
    Subscribe(#[source] rumqttc::ClientError),

    #[error("event channel closed")]
    ChannelClosed,
}

/// Subscribing MQTT client feeding the dispatcher
pub struct MqttListener {
    client: AsyncClient,
    eventloop: EventLoop,
    ingress: Ingress,
    events: mpsc::Sender<IngressEvent>,
}

impl MqttListener {
    /// Connect to the broker, failing if no CONNACK arrives in time, and
    /// establish the inbound subscriptions
    pub async fn connect(
        config: &MqttConfig,
        ingress: Ingress,
        events: mpsc::Sender<IngressEvent>,
    ) -> Result<Self, TransportError> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);

        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        timeout(connect_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(TransportError::Connect(e.to_string())),
                }
            }
        })
        .await
        .map_err(|_| TransportError::ConnectTimeout(connect_timeout))??;

        info!(host = %config.host, port = config.port, "Connected to MQTT broker");

        let listener = Self {
            client,
            eventloop,
            ingress,
            events,
        };
        Self::subscribe_all(&listener.client, &listener.ingress).await?;

        Ok(listener)
    }

    async fn subscribe_all(client: &AsyncClient, ingress: &Ingress) -> Result<(), TransportError> {
        let client = client.clone();
        let filters = ingress.classifier().subscriptions();
        for filter in filters {
            client
                .subscribe(filter.clone(), QoS::AtLeastOnce)
                .await
                .map_err(TransportError::Subscribe)?;
            info!(filter = %filter, "Subscribed");
        }
        Ok(())
    }

    /// Poll the broker until the dispatcher goes away
    pub async fn run(mut self) -> Result<(), TransportError> {
        info!("MQTT listener started");

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    if let Some(event) = self.ingress.accept(&publish.topic, &publish.payload) {
                        if self.events.send(event).await.is_err() {
                            return Err(TransportError::ChannelClosed);
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("Reconnected to broker, restoring subscriptions");
                    metrics::counter!("bridge.mqtt.reconnects").increment(1);
                    Self::subscribe_all(&self.client, &self.ingress).await?;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "MQTT connection lost, retrying");
                    metrics::counter!("bridge.mqtt.errors").increment(1);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}
