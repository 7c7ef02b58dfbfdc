use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CONFLICT_RETRIES: u32 = 3;

/// Application configuration, loaded from `config/{default,<env>}` files with
/// an `APP__*` environment overlay.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL (postgres in production, sqlite in tests)
    pub database_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Runtime environment: "development", "test", or "production"
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines (for log shippers)
    #[serde(default)]
    pub log_json: bool,

    /// Create missing tables on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1, max = 100))]
    pub db_max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub db_min_connections: u32,

    /// Bounded retries for operations hitting an optimistic version conflict
    #[serde(default = "default_conflict_retries")]
    #[validate(range(min = 1, max = 10))]
    pub conflict_retry_attempts: u32,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
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
fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_conflict_retries() -> u32 {
    DEFAULT_CONFLICT_RETRIES
}

impl AppConfig {
    /// Programmatic constructor, used by tests and embedded setups.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_max_connections(),
            db_min_connections: default_min_connections(),
            conflict_retry_attempts: default_conflict_retries(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loads configuration from `config/default`, `config/<APP_ENV>`, and the
/// `APP__*` environment overlay, then validates it.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .add_source(File::from(Path::new(CONFIG_DIR).join("default")).required(false))
        .add_source(File::from(Path::new(CONFIG_DIR).join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(e.to_string()))?;

    Ok(cfg)
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("fabline_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let registry = tracing_subscriber::registry().with(EnvFilter::new(filter_directive));

    if json {
        let _ = registry.with(fmt::layer().json()).try_init();
    } else {
        let _ = registry.with(fmt::layer()).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programmatic_config_defaults() {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18080,
            "test".to_string(),
        );
        assert_eq!(cfg.bind_address(), "127.0.0.1:18080");
        assert_eq!(cfg.conflict_retry_attempts, DEFAULT_CONFLICT_RETRIES);
        assert!(!cfg.is_development());
        assert!(cfg.validate().is_ok());
    }
}
