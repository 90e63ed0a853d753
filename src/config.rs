use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::errors::ServiceError;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_BACKEND_URL: &str = "http://localhost:54321";
const DEFAULT_TRACKING_BASE_URL: &str = "http://localhost:5173";
const DEFAULT_LOCATION_FUNCTION: &str = "update-location";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Base URL of the hosted backend (REST under `/rest/v1`, functions
    /// under `/functions/v1`)
    #[validate(url)]
    pub backend_url: String,

    /// Public API key sent as the `apikey` header
    #[serde(default)]
    pub api_key: String,

    /// Signed-in user's access token; the API key is used as bearer otherwise
    pub access_token: Option<String>,

    /// `rest` talks to the backend, `memory` keeps everything in process
    #[validate(custom = "validate_gateway_mode")]
    #[serde(default = "default_gateway_mode")]
    pub gateway_mode: String,

    /// JSON file of wire rows loaded into the in-memory gateway at startup
    pub seed_path: Option<String>,

    pub environment: String,

    #[validate(custom = "validate_log_level")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// Change-feed polling interval of the REST gateway
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_poll_interval")]
    pub realtime_poll_interval_secs: u64,

    /// Window in which change notifications fold into one re-fetch; 0 disables
    #[serde(default)]
    pub realtime_coalesce_ms: u64,

    #[validate(custom = "validate_notification_capacity")]
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    /// Public site used to build shipment tracking links
    #[validate(url)]
    pub tracking_base_url: String,

    #[validate(length(min = 1))]
    pub location_function: String,
}

impl AppConfig {
    /// Local in-memory configuration, used by tests and offline demos.
    pub fn in_memory() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            api_key: String::new(),
            access_token: None,
            gateway_mode: "memory".to_string(),
            seed_path: None,
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            realtime_poll_interval_secs: default_poll_interval(),
            realtime_coalesce_ms: 0,
            notification_capacity: default_notification_capacity(),
            tracking_base_url: DEFAULT_TRACKING_BASE_URL.to_string(),
            location_function: DEFAULT_LOCATION_FUNCTION.to_string(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn uses_rest_gateway(&self) -> bool {
        self.gateway_mode.eq_ignore_ascii_case("rest")
    }

    pub fn realtime_poll_interval(&self) -> Duration {
        Duration::from_secs(self.realtime_poll_interval_secs)
    }

    pub fn realtime_coalesce_window(&self) -> Duration {
        Duration::from_millis(self.realtime_coalesce_ms)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.uses_rest_gateway() && self.api_key.trim().is_empty() {
            let mut err = ValidationError::new("api_key_required");
            err.message = Some("Set APP__API_KEY when gateway_mode is rest".into());
            errors.add("api_key", err);
        }

        if self.is_production() && !self.backend_url.starts_with("https://") {
            let mut err = ValidationError::new("backend_url_insecure");
            err.message = Some("The backend must be reached over https in production".into());
            errors.add("backend_url", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

impl From<AppConfigError> for ServiceError {
    fn from(err: AppConfigError) -> Self {
        ServiceError::ConfigError(err.to_string())
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_gateway_mode() -> String {
    "rest".to_string()
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_notification_capacity() -> usize {
    DEFAULT_NOTIFICATION_CAPACITY
}

fn validate_gateway_mode(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "rest" | "memory" => Ok(()),
        _ => {
            let mut err = ValidationError::new("gateway_mode");
            err.message = Some("Must be one of: rest, memory".into());
            Err(err)
        }
    }
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

fn validate_notification_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("notification_capacity");
        err.message = Some("notification_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("logitrack={},reqwest=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    // try_init: a subscriber may already be installed (tests, embedding apps).
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
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
    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Loads configuration from `config_dir` for the `run_env` profile.
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("backend_url", DEFAULT_BACKEND_URL)?
        .set_default("gateway_mode", "rest")?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("realtime_poll_interval_secs", DEFAULT_POLL_INTERVAL_SECS)?
        .set_default("realtime_coalesce_ms", 0)?
        .set_default("notification_capacity", DEFAULT_NOTIFICATION_CAPACITY as u64)?
        .set_default("tracking_base_url", DEFAULT_TRACKING_BASE_URL)?
        .set_default("location_function", DEFAULT_LOCATION_FUNCTION)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
