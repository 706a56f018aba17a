use serde::Deserialize;
use std::fmt;

/// Main configuration for the flow archiver
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Object storage connection
    pub object_store: ObjectStoreConfig,
    /// Flow classification
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Archive layout and batching
    #[serde(default)]
    pub archive: ArchiveConfig,
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

/// S3-compatible object storage configuration
#[derive(Clone, Deserialize)]
pub struct ObjectStoreConfig {
    /// Endpoint URL (MinIO, Ceph, AWS, ...)
    pub endpoint: String,
    /// Region name
    #[serde(default = "default_region")]
    pub region: String,
    /// Static access key
    pub access_key: String,
    /// Static secret key
    pub secret_key: String,
    /// Bucket receiving archived flows
    pub bucket: String,
    /// Force path-style addressing
    #[serde(default = "default_true")]
    pub force_path_style: bool,
}

/// Flow classification configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifierConfig {
    /// CIDR ranges considered internal
    #[serde(default)]
    pub internal_ranges: Vec<String>,
}

/// Archive object layout
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Leading key component for every archived object
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Content type of archived objects
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Content encoding of archived objects (empty = none)
    #[serde(default)]
    pub content_encoding: String,
    /// Maximum concurrent object writes per batch
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    /// Number of flows collected before a batch is archived
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

// Default value functions
fn default_service_name() -> String {
    "flow-archiver".to_string()
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

fn default_true() -> bool {
    true
}

fn default_key_prefix() -> String {
    "flows".to_string()
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_upload_concurrency() -> usize {
    4
}

fn default_batch_size() -> usize {
    500
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/archiver").required(false))
            .add_source(config::File::with_name("/etc/flow-archiver/archiver").required(false))
            // FLOW_ARCHIVER__OBJECT_STORE__ENDPOINT -> object_store.endpoint
            .add_source(
                config::Environment::with_prefix("FLOW_ARCHIVER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("classifier.internal_ranges"),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
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

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            content_type: default_content_type(),
            content_encoding: String::new(),
            upload_concurrency: default_upload_concurrency(),
            batch_size: default_batch_size(),
        }
    }
}

impl fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}
