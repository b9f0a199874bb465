use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

/// Main configuration for the image service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Image storage layout and backend selection
    #[serde(default)]
    pub images: ImageConfig,
    /// S3 configuration (required for the aws backend)
    pub s3: Option<S3Config>,
    /// Database configuration (required for the aws backend)
    pub database: Option<DatabaseConfig>,
    /// API configuration
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
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Which store implementations back the service
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// S3 for blobs, PostgreSQL for metadata
    #[default]
    Aws,
    /// Process-local stores; contents are lost on restart
    Memory,
}

/// Image layout configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Namespace prefix of blob keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Extension appended to blob keys (without the dot)
    #[serde(default = "default_key_extension")]
    pub key_extension: String,
    /// Content type used when an upload does not name one
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
    /// Access link lifetime in seconds
    #[serde(default = "default_access_link_ttl_secs")]
    pub access_link_ttl_secs: u64,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for image storage
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
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
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest accepted request body; base64 inflates images by a third
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "image-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_key_prefix() -> String {
    "images/".to_string()
}

fn default_key_extension() -> String {
    "jpg".to_string()
}

fn default_content_type() -> String {
    "image/jpeg".to_string()
}

fn default_access_link_ttl_secs() -> u64 {
    3600
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/images").required(false))
            .add_source(config::File::with_name("/etc/images/images").required(false))
            // IMAGES__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("IMAGES")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.images.access_link_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "images.access_link_ttl_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.images.key_extension.is_empty() || self.images.key_extension.contains('.') {
            return Err(ConfigError::InvalidValue {
                key: "images.key_extension".to_string(),
                message: "must be a non-empty extension without a dot".to_string(),
            });
        }

        if self.images.backend == Backend::Aws {
            if self.s3.is_none() {
                return Err(ConfigError::MissingRequired("s3".to_string()));
            }
            if self.database.is_none() {
                return Err(ConfigError::MissingRequired("database".to_string()));
            }
        }

        Ok(())
    }

    /// Get access link lifetime as Duration
    pub fn access_link_ttl(&self) -> Duration {
        Duration::from_secs(self.images.access_link_ttl_secs)
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
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

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            key_prefix: default_key_prefix(),
            key_extension: default_key_extension(),
            default_content_type: default_content_type(),
            access_link_ttl_secs: default_access_link_ttl_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}
