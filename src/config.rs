use crate::ethereum::EthereumNetworkConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the forkwatch service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service-level configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Frame store configuration
    pub store: StoreConfig,
    /// Metadata index configuration
    pub indexer: IndexerConfig,
    /// Consensus-chain timing parameters
    #[serde(default)]
    pub ethereum: EthereumNetworkConfig,
    /// Frame sources
    #[serde(default)]
    pub sources: Vec<NamedSourceConfig>,
    /// Retention configuration
    #[serde(default)]
    pub retention: RetentionConfig,
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

/// Frame store backend, selected by the `type` tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Volatile in-memory store, for tests and local development.
    Memory,
    /// One file per frame under a base directory.
    Filesystem { base_dir: PathBuf },
    /// One object per frame in an S3-compatible bucket.
    S3(S3StoreConfig),
}

/// S3 store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3StoreConfig {
    /// Bucket holding the frame objects
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Key prefix under which frame objects are written
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Per-request operation timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Metadata index configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    /// Database connection string, e.g. `sqlite://forkwatch.db`
    #[serde(default = "default_indexer_dsn")]
    pub dsn: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection acquire timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// A configured source: a user-chosen name plus the typed per-kind config.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedSourceConfig {
    pub name: String,
    #[serde(flatten)]
    pub config: SourceConfig,
}

/// Source kind, selected by the `type` tag. Unknown kinds fail
/// deserialization with a typed error.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    BeaconNode(BeaconNodeSourceConfig),
    XatuHttp(XatuHttpSourceConfig),
}

/// Beacon node polling source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BeaconNodeSourceConfig {
    /// Beacon API base URL, e.g. `http://localhost:5052`
    pub endpoint: String,
    /// Seconds between polls
    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: u64,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Labels stamped onto every frame from this source
    #[serde(default)]
    pub labels: Vec<String>,
    /// Consensus client implementation behind the endpoint, if known
    #[serde(default)]
    pub consensus_client: String,
}

/// Xatu push receiver configuration. The receiver itself runs outside this
/// binary; the shape is accepted so deployments can share one config file.
#[derive(Debug, Clone, Deserialize)]
pub struct XatuHttpSourceConfig {
    pub listen_addr: String,
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Frames older than this are purged
    #[serde(default = "default_retention_period_secs")]
    pub period_secs: u64,
    /// Seconds between purge passes
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "forkwatch".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "forkwatch".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_indexer_dsn() -> String {
    "sqlite://forkwatch.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_run_migrations() -> bool {
    true
}

fn default_polling_interval_secs() -> u64 {
    12
}

fn default_retention_period_secs() -> u64 {
    // 30 days
    30 * 24 * 60 * 60
}

fn default_purge_interval_secs() -> u64 {
    60
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

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            period_secs: default_retention_period_secs(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

impl Config {
    /// Load configuration from config files and environment.
    /// `FORKWATCH__STORE__TYPE=memory` maps to `store.type`, and so on.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/forkwatch").required(false))
            .add_source(config::File::with_name("/etc/forkwatch/forkwatch").required(false))
            .add_source(
                config::Environment::with_prefix("FORKWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention.period_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.retention.purge_interval_secs)
    }
}
