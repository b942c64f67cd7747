//! Configuration management for the image ingest service.
//!
//! Configuration is layered with the `config` crate: built-in defaults, then
//! optional config files, then `INGEST__*` environment variables, then the
//! flat legacy variables older deployments still export.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the ingest service.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Service identity and metrics
    #[serde(default)]
    pub service: ServiceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Watch directory, worker pool and queue sizing
    #[serde(default)]
    pub watch: WatchConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Notification API configuration
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Event the ingested images are filed under
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Service-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Watch directory and pipeline sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Flat directory new images are dropped into
    #[serde(default = "default_watch_dir")]
    pub dir: PathBuf,

    /// Number of concurrent pipeline workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Capacity of the pending-file queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Delay between a creation event and its enqueue, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Interval over which a file's size must stay unchanged, in milliseconds
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

/// S3-compatible object storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Bucket uploads are written to
    #[serde(default)]
    pub bucket: String,

    /// Custom endpoint URL (B2, MinIO, ...)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Region name passed to the SDK
    #[serde(default = "default_region")]
    pub region: String,

    /// Static access key id
    #[serde(default)]
    pub access_key_id: String,

    /// Static secret access key
    #[serde(default)]
    pub secret_access_key: String,

    /// Force path-style addressing
    #[serde(default = "default_true")]
    pub force_path_style: bool,
}

/// Notification API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Endpoint receiving the uploaded-image POST
    #[serde(default)]
    pub url: String,

    /// Credential sent as `Authorization: Basic <api_key>`
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Collection ids attached to every notification
    #[serde(default = "default_collection_ids")]
    pub collection_ids: Vec<i64>,
}

/// Cache configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Redis connection URL; the cache is not connected when unset
    #[serde(default)]
    pub url: Option<String>,
}

/// Identifiers every upload is filed under.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadConfig {
    /// Event id
    #[serde(default)]
    pub event_id: String,

    /// Id of the user owning the event
    #[serde(default)]
    pub user_id: String,
}

// Default value functions
fn default_service_name() -> String {
    "image-ingest".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_watch_dir() -> PathBuf {
    PathBuf::from("/app/mnt/vfs")
}
fn default_worker_count() -> usize {
    5
}
fn default_queue_capacity() -> usize {
    100
}
fn default_debounce_ms() -> u64 {
    1000
}
fn default_settle_ms() -> u64 {
    1000
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_true() -> bool {
    true
}
fn default_request_timeout() -> u64 {
    30
}
fn default_collection_ids() -> Vec<i64> {
    vec![-1]
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            metrics_port: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dir: default_watch_dir(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            debounce_ms: default_debounce_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint_url: None,
            region: default_region(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            force_path_style: true,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            request_timeout_secs: default_request_timeout(),
            collection_ids: default_collection_ids(),
        }
    }
}

/// Flat environment variables from older deployments and the keys they map to.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("B2_BOTO_ACCESS_KEY_ID", "storage.access_key_id"),
    ("B2_BOTO_ACCESS_KEY", "storage.secret_access_key"),
    ("B2_BOTO_ENDPOINT_URL", "storage.endpoint_url"),
    ("B2_BUCKET_NAME", "storage.bucket"),
    ("FOTOOWL_INTERNAL_API_KEY", "notify.api_key"),
    ("FOTOOWL_EVENT_PICTURE_PROCESS_API", "notify.url"),
    ("REDIS_URL", "cache.url"),
];

impl IngestConfig {
    /// Load configuration from files and environment variables.
    ///
    /// Sources, later overriding earlier:
    /// 1. `config/ingest` (optional)
    /// 2. `/etc/image-ingest/ingest` (optional)
    /// 3. Environment variables (e.g. `INGEST__WATCH__DIR`)
    /// 4. Legacy flat variables (`B2_BUCKET_NAME`, `REDIS_URL`, ...)
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/ingest").required(false))
            .add_source(File::with_name("/etc/image-ingest/ingest").required(false))
            .add_source(
                Environment::with_prefix("INGEST")
                    .separator("__")
                    .try_parsing(true),
            );

        let builder = apply_legacy_env(builder, |name| std::env::var(name).ok())?;

        builder.build()?.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.watch.dir.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField("watch.dir".to_string()));
        }
        if self.watch.worker_count == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "watch.worker_count".to_string(),
                message: "at least one worker is required".to_string(),
            });
        }
        if self.watch.queue_capacity == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "watch.queue_capacity".to_string(),
                message: "queue capacity must be greater than 0".to_string(),
            });
        }

        let required = [
            ("storage.bucket", &self.storage.bucket),
            ("storage.access_key_id", &self.storage.access_key_id),
            ("storage.secret_access_key", &self.storage.secret_access_key),
            ("notify.url", &self.notify.url),
            ("notify.api_key", &self.notify.api_key),
            ("upload.event_id", &self.upload.event_id),
            ("upload.user_id", &self.upload.user_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigValidationError::MissingField(field.to_string()));
            }
        }

        if !self.notify.url.starts_with("http://") && !self.notify.url.starts_with("https://") {
            return Err(ConfigValidationError::InvalidValue {
                field: "notify.url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        Ok(())
    }
}

fn apply_legacy_env(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    for (var, key) in LEGACY_ENV {
        let value = lookup(var).filter(|v| !v.is_empty());
        builder = builder.set_override_option(*key, value)?;
    }
    Ok(builder)
}

impl WatchConfig {
    /// Get the debounce delay as Duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Get the stability settle interval as Duration.
    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl NotifyConfig {
    /// Get request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
