//! Configuration management for the harvest services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Search provider client configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Queue configuration (SQS)
    #[serde(default)]
    pub queue: QueueConfig,

    /// Worker loop configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply pending migrations on start-up
    #[serde(default = "default_enabled")]
    pub run_migrations: bool,
}

/// Settings for the bibliographic search provider client
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// API base URL
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// API key sent as `x-api-key` (optional, raises the provider quota)
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Minimum gap between the end of one request and the start of the next
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Wait after a rate-limit response before retrying
    #[serde(default = "default_rate_limit_cooldown")]
    pub rate_limit_cooldown_secs: u64,

    /// Cap on rate-limit retries per request; 0 retries forever
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Retries for transient server errors
    #[serde(default = "default_provider_retries")]
    pub max_retries: u32,

    /// First backoff delay for transient errors
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,

    /// Upper bound for a single backoff delay
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,

    /// Largest page the provider serves
    #[serde(default = "default_page_size_max")]
    pub page_size_max: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// SQS harvest queue URL
    pub harvest_queue_url: Option<String>,

    /// Maximum messages to receive per poll
    #[serde(default = "default_queue_batch_size")]
    pub max_messages: i32,

    /// Long polling timeout in seconds
    #[serde(default = "default_queue_poll_timeout")]
    pub wait_time_secs: i32,

    /// Visibility timeout in seconds (covers a full harvest)
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Flush session counters every N processed records
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,

    /// Consecutive queue failures before polling pauses
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,

    /// Pause length once the failure threshold is hit
    #[serde(default = "default_circuit_break")]
    pub circuit_break_secs: u64,

    /// Sleep after a failed receive
    #[serde(default = "default_receive_error_backoff")]
    pub receive_error_backoff_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Default value functions
fn default_database_url() -> String { "postgres://localhost/scholar_harvest".to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_provider_base_url() -> String { "https://api.semanticscholar.org/graph/v1".to_string() }
fn default_provider_timeout() -> u64 { 30 }
fn default_request_delay() -> u64 { 3000 }
fn default_rate_limit_cooldown() -> u64 { 60 }
fn default_max_rate_limit_retries() -> u32 { 10 }
fn default_provider_retries() -> u32 { 3 }
fn default_backoff_initial() -> u64 { 2000 }
fn default_backoff_max() -> u64 { 60 }
fn default_page_size_max() -> u32 { 100 }
fn default_queue_batch_size() -> i32 { 10 }
fn default_queue_poll_timeout() -> i32 { 20 }
fn default_visibility_timeout() -> i32 { 900 }
fn default_progress_interval() -> usize { 10 }
fn default_max_failures() -> u32 { 5 }
fn default_circuit_break() -> u64 { 30 }
fn default_receive_error_backoff() -> u64 { 5 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__PROVIDER__API_KEY=...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Self = config.try_deserialize()?;
        config.apply_env_fallbacks();
        Ok(config)
    }

    fn apply_env_fallbacks(&mut self) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var("SEMANTIC_SCHOLAR_API_KEY").ok();
        }
    }
}

impl ProviderConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the inter-request delay as Duration
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// Get the rate-limit cooldown as Duration
    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            run_migrations: default_enabled(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            api_key: None,
            timeout_secs: default_provider_timeout(),
            request_delay_ms: default_request_delay(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            max_retries: default_provider_retries(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_secs: default_backoff_max(),
            page_size_max: default_page_size_max(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            harvest_queue_url: None,
            max_messages: default_queue_batch_size(),
            wait_time_secs: default_queue_poll_timeout(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            progress_interval: default_progress_interval(),
            max_consecutive_failures: default_max_failures(),
            circuit_break_secs: default_circuit_break(),
            receive_error_backoff_secs: default_receive_error_backoff(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            provider: ProviderConfig::default(),
            queue: QueueConfig::default(),
            worker: WorkerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
