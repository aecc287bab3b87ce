//! Configuration management.

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    pub database: DatabaseConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub negotiation: NegotiationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub otlp_endpoint: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

/// Service-level defaults applied by PublishRFP and the Sweep (§4.3, §5).
#[derive(Debug, Clone, Deserialize)]
pub struct NegotiationConfig {
    #[serde(default = "default_max_latency_ms")]
    pub default_max_latency_ms: i64,

    #[serde(default = "default_min_success_rate")]
    pub default_min_success_rate: f64,

    #[serde(default = "default_min_volume")]
    pub default_min_volume: i64,

    #[serde(default = "default_max_counter_rounds")]
    pub default_max_counter_rounds: i32,

    #[serde(default = "default_max_winners")]
    pub default_max_winners: i32,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_selecting_grace_secs")]
    pub selecting_grace_secs: i64,

    #[serde(default = "default_batch_size")]
    pub sweep_batch_size: i64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            default_max_latency_ms: default_max_latency_ms(),
            default_min_success_rate: default_min_success_rate(),
            default_min_volume: default_min_volume(),
            default_max_counter_rounds: default_max_counter_rounds(),
            default_max_winners: default_max_winners(),
            sweep_interval_secs: default_sweep_interval_secs(),
            selecting_grace_secs: default_selecting_grace_secs(),
            sweep_batch_size: default_batch_size(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_json_logging() -> bool {
    true
}
fn default_max_latency_ms() -> i64 {
    10_000
}
fn default_min_success_rate() -> f64 {
    95.0
}
fn default_min_volume() -> i64 {
    1
}
fn default_max_counter_rounds() -> i32 {
    3
}
fn default_max_winners() -> i32 {
    1
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_selecting_grace_secs() -> i64 {
    24 * 3600
}
fn default_batch_size() -> i64 {
    100
}

impl Config {
    /// Load configuration from environment variables (`NEGOTIATION__SECTION__FIELD`).
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("NEGOTIATION").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, then overlay environment variables.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("NEGOTIATION").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
