use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::env;

const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Application configuration. Values come from defaults overlaid with
/// `APP_`-prefixed environment variables (e.g. `APP_DATABASE_URL`,
/// `APP_SWEEP_INTERVAL_SECS`).
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Bind host
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment name: development, test, production
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level for the crate's tracing filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Create missing tables from the entity definitions at startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Interval between promotion sweep passes, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Whether the sweep may auto-reactivate manually deactivated offers and
    /// codes whose window is (still) open. Off by default: an admin switching
    /// a promotion off means off.
    #[serde(default)]
    pub sweep_reactivate_manual: bool,

    /// Wallet currency code used when creating wallets lazily
    #[serde(default = "default_currency")]
    pub wallet_currency: String,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_currency() -> String {
    "INR".to_string()
}

/// Loads configuration from built-in defaults plus `APP_*` environment
/// variables.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("auto_migrate", true)?
        .set_default("sweep_interval_secs", DEFAULT_SWEEP_INTERVAL_SECS as i64)?
        .set_default("sweep_reactivate_manual", false)?
        .set_default("wallet_currency", "INR")?
        .add_source(Environment::with_prefix("APP").separator("__"));

    builder.build()?.try_deserialize()
}

/// Initializes the tracing subscriber. `RUST_LOG` wins over the configured
/// level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}
