use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the storage service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
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

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding uploaded recordings. Required, checked when the
    /// blob store is built.
    pub bucket: Option<String>,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Lifetime of the access URL returned by an upload
    #[serde(default = "default_upload_url_expiry_secs")]
    pub upload_url_expiry_secs: u64,
    /// Lifetime of the access URL returned by delivery
    #[serde(default = "default_delivery_url_expiry_secs")]
    pub delivery_url_expiry_secs: u64,
    /// Key prefix for recordings
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Content type stored with every recording
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Largest accepted upload body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Which store implementation backs metadata and analytics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Store implementation
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// PostgreSQL connection URL (required for the postgres backend)
    pub url: Option<String>,
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
    #[serde(default = "default_run_migrations")]
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
    /// Public base URL of the web application, used for share links
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,
}

// Default value functions
fn default_service_name() -> String {
    "storage-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "eu-north-1".to_string()
}

fn default_upload_url_expiry_secs() -> u64 {
    7 * 24 * 60 * 60 // 7 days
}

fn default_delivery_url_expiry_secs() -> u64 {
    3600
}

fn default_key_prefix() -> String {
    "videos".to_string()
}

fn default_content_type() -> String {
    "video/webm".to_string()
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024 // 512MB
}

fn default_backend() -> StoreBackend {
    StoreBackend::Postgres
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

fn default_run_migrations() -> bool {
    true
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

fn default_app_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "storage-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/storage").required(false))
            .add_source(config::File::with_name("/etc/recorder/storage").required(false))
            // STORAGE__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("STORAGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Access URL lifetime for freshly uploaded recordings
    pub fn upload_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.upload_url_expiry_secs)
    }

    /// Access URL lifetime for delivery
    pub fn delivery_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.delivery_url_expiry_secs)
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

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            upload_url_expiry_secs: default_upload_url_expiry_secs(),
            delivery_url_expiry_secs: default_delivery_url_expiry_secs(),
            key_prefix: default_key_prefix(),
            content_type: default_content_type(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: default_run_migrations(),
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
            app_base_url: default_app_base_url(),
        }
    }
}
