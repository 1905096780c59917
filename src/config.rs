use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Offer time-to-live in seconds (agent response deadline)
    #[serde(default = "default_offer_ttl_secs")]
    pub offer_ttl_secs: u64,
    /// Agents offered per round: 1 = serial escalation, N = parallel broadcast
    #[serde(default = "default_candidates_per_round")]
    pub candidates_per_round: usize,
    /// Interval between expiry sweep passes in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum due offers processed per sweep pass
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: i64,
    /// Candidate selector retry attempts before flagging for an operator
    #[serde(default = "default_selector_max_retries")]
    pub selector_max_retries: u32,
    /// Base backoff between selector retries in milliseconds (doubles per
    /// attempt, with jitter)
    #[serde(default = "default_selector_backoff_ms")]
    pub selector_backoff_ms: u64,
}

fn default_offer_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_candidates_per_round() -> usize {
    1
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_sweep_batch_size() -> i64 {
    100
}

fn default_selector_max_retries() -> u32 {
    3
}

fn default_selector_backoff_ms() -> u64 {
    500
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            offer_ttl_secs: default_offer_ttl_secs(),
            candidates_per_round: default_candidates_per_round(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch_size: default_sweep_batch_size(),
            selector_max_retries: default_selector_max_retries(),
            selector_backoff_ms: default_selector_backoff_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn offer_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.offer_ttl_secs as i64)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationConfig {
    /// Webhook endpoint for offer push notifications; when unset, offers
    /// are only visible via polling and notification attempts are logged.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Request timeout in milliseconds
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_notify_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for rolling log files (console-only when unset)
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DryRunConfig {
    /// Run against the in-memory store with a fixed candidate pool
    #[serde(default)]
    pub enabled: bool,
    /// Candidate pool for dry-run mode, in offer order
    #[serde(default)]
    pub agent_pool: Vec<String>,
}

impl AppConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (later overrides earlier): config file, then `ROOFTOP_*`
    /// environment variables (e.g. `ROOFTOP_DATABASE__URL`).
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let path = config_path.unwrap_or("config/default.toml");
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("ROOFTOP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.offer_ttl_secs, 300);
        assert_eq!(config.candidates_per_round, 1);
        assert_eq!(config.offer_ttl(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("ROOFTOP_DATABASE__URL", "postgres://localhost/rooftop_test");
        std::env::set_var("ROOFTOP_DISPATCH__CANDIDATES_PER_ROUND", "3");

        let config = AppConfig::load(Some("does/not/exist.toml")).unwrap();
        assert_eq!(config.database.url, "postgres://localhost/rooftop_test");
        assert_eq!(config.dispatch.candidates_per_round, 3);
        assert_eq!(config.dispatch.offer_ttl_secs, 300);

        std::env::remove_var("ROOFTOP_DATABASE__URL");
        std::env::remove_var("ROOFTOP_DISPATCH__CANDIDATES_PER_ROUND");
    }
}
