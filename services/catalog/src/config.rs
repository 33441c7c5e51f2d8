use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the catalog service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// MQTT broker configuration
    pub mqtt: MqttConfig,
    /// Legacy database holding the instrument catalog
    pub database: DatabaseConfig,
    /// Republication tuning
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// MQTT broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname
    pub host: String,
    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Client identifier presented to the broker
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Username (if the broker requires credentials)
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Initial connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Legacy database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// MySQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Pool acquire timeout in seconds
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

/// Republication tuning
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Per-type topics are published under this prefix
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Seconds between catalog refreshes; the first runs at startup
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "emcampo-catalog".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "emcampo-catalog".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_connections() -> u32 {
    2
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

fn default_topic_prefix() -> String {
    "alcateia/riodeserto/emcampo/cadastro".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    3600
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/catalog").required(false))
            .add_source(config::File::with_name("/etc/emcampo/catalog").required(false))
            // Override with environment variables
            // CATALOG__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("CATALOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get the refresh interval as Duration
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.catalog.refresh_interval_secs)
    }

    /// Get the MQTT connect timeout as Duration
    pub fn mqtt_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt.connect_timeout_secs)
    }
}
