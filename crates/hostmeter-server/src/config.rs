//! Server configuration loading from file and environment variables.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use hostmeter_facts::ProductCatalog;
use serde::Deserialize;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Inbound processing.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub outbox: OutboxConfig,

    /// Downstream publishing.
    #[serde(default)]
    pub emitter: EmitterConfig,

    /// Per-message retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Product tag lookup tables.
    #[serde(default)]
    pub products: ProductCatalog,
}

/// Network configuration for the internal HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allow operational endpoints to run synchronously on request.
    #[serde(default)]
    pub synchronous_operations_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "hostmeter_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Days past a host's stale timestamp after which its events are dropped.
    #[serde(default = "default_culling_offset_days")]
    pub culling_offset_days: u32,

    /// RHSM facts synced longer than this before the start of today are ignored.
    #[serde(default = "default_host_last_sync_threshold_hours")]
    pub host_last_sync_threshold_hours: u32,

    /// Number of partition workers.
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    /// Queued messages per partition before the reader waits.
    #[serde(default = "default_partition_buffer")]
    pub partition_buffer: usize,

    /// JSON-lines input file. Standard input when unset.
    #[serde(default)]
    pub input_path: Option<String>,

    #[serde(default)]
    pub use_cpu_system_facts_for_all_products: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,

    /// Seconds between scheduled flushes. `0` disables the schedule.
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,

    #[serde(default = "default_purge_interval_seconds")]
    pub purge_interval_seconds: u64,

    /// How long sent records are kept before purging.
    #[serde(default = "default_sent_retention_seconds")]
    pub sent_retention_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmitterConfig {
    /// Publish events downstream. When off, events are logged instead.
    #[serde(default = "default_true")]
    pub emit_events: bool,

    /// Capacity of the downstream buffer.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// How long a send waits for buffer capacity.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// JSON-lines output file. Standard output when unset.
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier.max(1.0),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "hostmeter.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_culling_offset_days() -> u32 {
    14
}

fn default_host_last_sync_threshold_hours() -> u32 {
    24
}

fn default_partitions() -> usize {
    4
}

fn default_partition_buffer() -> usize {
    128
}

fn default_flush_batch_size() -> usize {
    500
}

fn default_flush_interval_seconds() -> u64 {
    30
}

fn default_purge_interval_seconds() -> u64 {
    3_600
}

fn default_sent_retention_seconds() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

fn default_buffer_capacity() -> usize {
    1_024
}

fn default_send_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            synchronous_operations_enabled: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            culling_offset_days: default_culling_offset_days(),
            host_last_sync_threshold_hours: default_host_last_sync_threshold_hours(),
            partitions: default_partitions(),
            partition_buffer: default_partition_buffer(),
            input_path: None,
            use_cpu_system_facts_for_all_products: false,
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            flush_batch_size: default_flush_batch_size(),
            flush_interval_seconds: default_flush_interval_seconds(),
            purge_interval_seconds: default_purge_interval_seconds(),
            sent_retention_seconds: default_sent_retention_seconds(),
        }
    }
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            emit_events: true,
            buffer_capacity: default_buffer_capacity(),
            send_timeout_ms: default_send_timeout_ms(),
            output_path: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults when the
/// file does not exist, then applies environment overrides.
///
/// Environment variable overrides:
/// - `HOSTMETER_HOST`, `HOSTMETER_PORT`
/// - `HOSTMETER_DB_PATH`
/// - `HOSTMETER_LOG_LEVEL`, `HOSTMETER_LOG_JSON`
/// - `HOSTMETER_EMIT_EVENTS`
/// - `HOSTMETER_SYNCHRONOUS_OPERATIONS`
/// - `HOSTMETER_CULLING_OFFSET_DAYS`
/// - `HOSTMETER_INPUT_PATH`, `HOSTMETER_OUTPUT_PATH`
/// - `HOSTMETER_FLUSH_INTERVAL_SECONDS`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `HOSTMETER_*` overrides read through `lookup`. Unparseable values
/// are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    fn flag(value: &str) -> bool {
        value == "true" || value == "1"
    }

    if let Some(parsed) = lookup("HOSTMETER_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = lookup("HOSTMETER_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(db_path) = lookup("HOSTMETER_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = lookup("HOSTMETER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("HOSTMETER_LOG_JSON") {
        config.logging.json = flag(&json);
    }
    if let Some(emit) = lookup("HOSTMETER_EMIT_EVENTS") {
        config.emitter.emit_events = flag(&emit);
    }
    if let Some(sync) = lookup("HOSTMETER_SYNCHRONOUS_OPERATIONS") {
        config.server.synchronous_operations_enabled = flag(&sync);
    }
    if let Some(parsed) = lookup("HOSTMETER_CULLING_OFFSET_DAYS").and_then(|v| v.parse().ok()) {
        config.pipeline.culling_offset_days = parsed;
    }
    if let Some(input) = lookup("HOSTMETER_INPUT_PATH") {
        config.pipeline.input_path = Some(input);
    }
    if let Some(output) = lookup("HOSTMETER_OUTPUT_PATH") {
        config.emitter.output_path = Some(output);
    }
    if let Some(parsed) = lookup("HOSTMETER_FLUSH_INTERVAL_SECONDS").and_then(|v| v.parse().ok()) {
        config.outbox.flush_interval_seconds = parsed;
    }
}
