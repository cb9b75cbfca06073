use config::{Config, ConfigError, Environment, File};
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_MO_REFERENCE_PREFIX: &str = "MO";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Load the demo catalog (wooden table BOM) on startup when the database is empty
    #[serde(default)]
    pub seed_demo_data: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Work center assigned to generated work orders when the request names none
    #[serde(default)]
    pub default_work_center_id: Option<Uuid>,

    /// Prefix of generated manufacturing order references
    #[serde(default = "default_mo_reference_prefix")]
    #[validate(custom = "validate_reference_prefix")]
    pub mo_reference_prefix: String,

    /// Attempts at generating a non-colliding order reference
    #[serde(default = "default_reference_retry_attempts")]
    #[validate(range(min = 1, max = 100))]
    pub reference_retry_attempts: u32,

    /// Attempts at a stock-mutating transaction before reporting a conflict
    #[serde(default = "default_lock_retry_attempts")]
    #[validate(range(min = 1, max = 50))]
    pub lock_retry_attempts: u32,

    /// Base backoff between lock retries (milliseconds, grows linearly plus jitter)
    #[serde(default = "default_lock_retry_backoff_ms")]
    pub lock_retry_backoff_ms: u64,

    /// Reverse component consumption when an in-progress order is cancelled
    #[serde(default = "default_true_bool")]
    pub restore_stock_on_cancel: bool,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a new configuration with defaults for every tunable
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            seed_demo_data: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            default_work_center_id: None,
            mo_reference_prefix: default_mo_reference_prefix(),
            reference_retry_attempts: default_reference_retry_attempts(),
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_retry_backoff_ms: default_lock_retry_backoff_ms(),
            restore_stock_on_cancel: default_true_bool(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Tunables of the manufacturing core, detached from transport and storage settings
#[derive(Clone, Debug)]
pub struct ManufacturingSettings {
    pub reference_prefix: String,
    pub reference_retry_attempts: u32,
    pub lock_retry_attempts: u32,
    pub lock_retry_backoff: Duration,
    pub default_work_center_id: Option<Uuid>,
    pub restore_stock_on_cancel: bool,
}

impl Default for ManufacturingSettings {
    fn default() -> Self {
        Self {
            reference_prefix: default_mo_reference_prefix(),
            reference_retry_attempts: default_reference_retry_attempts(),
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_retry_backoff: Duration::from_millis(default_lock_retry_backoff_ms()),
            default_work_center_id: None,
            restore_stock_on_cancel: true,
        }
    }
}

impl From<&AppConfig> for ManufacturingSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            reference_prefix: cfg.mo_reference_prefix.clone(),
            reference_retry_attempts: cfg.reference_retry_attempts,
            lock_retry_attempts: cfg.lock_retry_attempts,
            lock_retry_backoff: Duration::from_millis(cfg.lock_retry_backoff_ms),
            default_work_center_id: cfg.default_work_center_id,
            restore_stock_on_cancel: cfg.restore_stock_on_cancel,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_mo_reference_prefix() -> String {
    DEFAULT_MO_REFERENCE_PREFIX.to_string()
}

fn default_reference_retry_attempts() -> u32 {
    5
}

fn default_lock_retry_attempts() -> u32 {
    5
}

fn default_lock_retry_backoff_ms() -> u64 {
    25
}

fn default_true_bool() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// References are `<PREFIX><yymmdd><4 digits>`; the prefix must stay short and alphabetic
fn validate_reference_prefix(prefix: &str) -> Result<(), ValidationError> {
    let pattern = Regex::new(r"^[A-Z]{1,8}$").map_err(|_| ValidationError::new("regex"))?;
    if pattern.is_match(prefix) {
        Ok(())
    } else {
        let mut err = ValidationError::new("mo_reference_prefix");
        err.message = Some("Must be 1-8 uppercase ASCII letters".into());
        Err(err)
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("manuflow_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://manuflow.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config = from_config(config)?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

/// Deserializes and validates an already layered configuration
pub fn from_config(config: Config) -> Result<AppConfig, AppConfigError> {
    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    Ok(app_config)
}
