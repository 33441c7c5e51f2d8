use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the bridge service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// MQTT broker configuration
    pub mqtt: MqttConfig,
    /// Topic layout
    #[serde(default)]
    pub topics: TopicsConfig,
    /// Merge/debounce tuning
    #[serde(default)]
    pub merge: MergeConfig,
    /// Photo storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Webhook delivery configuration
    pub webhook: WebhookConfig,
    /// Legacy database for the photo record store (optional)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
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
    /// Initial connect timeout in seconds; startup fails if no CONNACK arrives in time
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bound of the in-flight event channel between listener and dispatcher
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

/// Subscribed and self-published topic layout
#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    /// Topic delivering the full reading-batch document
    #[serde(default = "default_readings_topic")]
    pub readings: String,
    /// Prefix of the per-photo topic family; the final segment is the reading id
    #[serde(default = "default_photos_prefix")]
    pub photos_prefix: String,
    /// Prefix of this system's own publications, filtered to prevent feedback loops
    #[serde(default = "default_publish_prefix")]
    pub publish_prefix: String,
}

/// Merge/debounce tuning
#[derive(Debug, Clone, Deserialize)]
pub struct MergeConfig {
    /// Quiet period after the last relevant event before a merge pass fires
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Pending photos older than this are evicted at merge-pass start
    #[serde(default = "default_photo_ttl_secs")]
    pub photo_ttl_secs: u64,
    /// Filename derivation policy for saved photos
    #[serde(default)]
    pub filename_policy: FilenamePolicy,
    /// When set, photo references are URLs under this base instead of local paths
    pub public_base_url: Option<String>,
}

/// Filename derivation policy; deployments have used both shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FilenamePolicy {
    /// "{point} - {id}.jpg" where point is the code before " - " in the site label
    #[default]
    PointAndId,
    /// "{id}.jpg"
    IdOnly,
}

/// Photo storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory photos are written to; created at startup if absent
    #[serde(default = "default_photos_dir")]
    pub photos_dir: String,
}

/// Webhook delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint receiving the merged document
    pub url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
    /// Total time budget for retrying transient delivery failures; 0 disables retry
    #[serde(default = "default_retry_max_elapsed_secs")]
    pub retry_max_elapsed_secs: u64,
}

/// Legacy database configuration for the photo record store
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

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default value functions
fn default_service_name() -> String {
    "emcampo-bridge".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "emcampo-bridge".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_readings_topic() -> String {
    "alcateia/riodeserto/emcampo/leituras".to_string()
}

fn default_photos_prefix() -> String {
    "alcateia/riodeserto/emcampo/fotos".to_string()
}

fn default_publish_prefix() -> String {
    "alcateia/riodeserto/emcampo/cadastro".to_string()
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_photo_ttl_secs() -> u64 {
    900
}

fn default_photos_dir() -> String {
    "./fotos-inspecoes".to_string()
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_retry_max_elapsed_secs() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            readings: default_readings_topic(),
            photos_prefix: default_photos_prefix(),
            publish_prefix: default_publish_prefix(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            photo_ttl_secs: default_photo_ttl_secs(),
            filename_policy: FilenamePolicy::default(),
            public_base_url: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            photos_dir: default_photos_dir(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/bridge").required(false))
            .add_source(config::File::with_name("/etc/emcampo/bridge").required(false))
            // Override with environment variables
            // BRIDGE__MQTT__HOST -> mqtt.host
            .add_source(
                config::Environment::with_prefix("BRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get the debounce quiet period as Duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.merge.debounce_ms)
    }

    /// Get the pending-photo TTL as Duration
    pub fn photo_ttl(&self) -> Duration {
        Duration::from_secs(self.merge.photo_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_debounce_ms(), 2000);
        assert_eq!(default_photo_ttl_secs(), 900);
        assert_eq!(default_mqtt_port(), 1883);
        assert_eq!(default_photos_dir(), "./fotos-inspecoes");
    }

    #[test]
    fn test_filename_policy_deserialization() {
        let policy: FilenamePolicy = serde_json::from_str("\"point-and-id\"").unwrap();
        assert_eq!(policy, FilenamePolicy::PointAndId);

        let policy: FilenamePolicy = serde_json::from_str("\"id-only\"").unwrap();
        assert_eq!(policy, FilenamePolicy::IdOnly);
    }

    #[test]
    fn test_merge_config_defaults() {
        let merge = MergeConfig::default();
        assert_eq!(merge.debounce_ms, 2000);
        assert_eq!(merge.filename_policy, FilenamePolicy::PointAndId);
        assert!(merge.public_base_url.is_none());
    }
}
