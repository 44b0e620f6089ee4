use std::env;
use std::time::Duration;

use crate::estimator::{PolicyKind, DEFAULT_EPSILON};
use crate::hub::{WildcardPolicy, DEFAULT_OBSERVER_QUEUE_CAPACITY};

/// Broker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bind address shared by both listeners
    pub bind_addr: String,
    /// Port producers stream readings to
    pub tcp_port: u16,
    /// Port serving the observer WebSocket and health endpoint
    pub ws_port: u16,
    /// PostgreSQL database URL; the in-memory store is used when absent
    pub database_url: Option<String>,
    /// Maximum pooled database connections
    pub db_max_connections: u32,
    /// Trailing window a sensor must have reported within to be selected
    pub selection_window: Duration,
    pub reliability_policy: PolicyKind,
    pub reliability_epsilon: f64,
    pub wildcard_policy: WildcardPolicy,
    /// Undelivered updates an observer may queue before it is dropped
    pub observer_queue_capacity: usize,
    /// CORS allowed origins (comma-separated in env var, `*` for any)
    pub cors_origins: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            tcp_port: 9000,
            ws_port: 8081,
            database_url: None,
            db_max_connections: 10,
            selection_window: Duration::from_secs(60),
            reliability_policy: PolicyKind::VarianceRatio,
            reliability_epsilon: DEFAULT_EPSILON,
            wildcard_policy: WildcardPolicy::Additive,
            observer_queue_capacity: DEFAULT_OBSERVER_QUEUE_CAPACITY,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl BrokerConfig {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let selection_window_seconds: u64 =
            parse_var(&lookup, "SELECTION_WINDOW_SECONDS")?.unwrap_or(60);
        if selection_window_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SELECTION_WINDOW_SECONDS must be greater than zero".to_string(),
            ));
        }

        let reliability_epsilon: f64 =
            parse_var(&lookup, "RELIABILITY_EPSILON")?.unwrap_or(DEFAULT_EPSILON);
        if !(reliability_epsilon.is_finite() && reliability_epsilon > 0.0) {
            return Err(ConfigError::InvalidValue(
                "RELIABILITY_EPSILON must be a positive number".to_string(),
            ));
        }

        let observer_queue_capacity: usize = parse_var(&lookup, "OBSERVER_QUEUE_CAPACITY")?
            .unwrap_or(DEFAULT_OBSERVER_QUEUE_CAPACITY);
        if observer_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "OBSERVER_QUEUE_CAPACITY must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            tcp_port: parse_port(&lookup, "TCP_PORT")?.unwrap_or(defaults.tcp_port),
            ws_port: parse_port(&lookup, "WS_PORT")?.unwrap_or(defaults.ws_port),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            db_max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS")?
                .unwrap_or(defaults.db_max_connections),
            selection_window: Duration::from_secs(selection_window_seconds),
            reliability_policy: parse_var(&lookup, "RELIABILITY_POLICY")?
                .unwrap_or(defaults.reliability_policy),
            reliability_epsilon,
            wildcard_policy: parse_var(&lookup, "WILDCARD_POLICY")?
                .unwrap_or(defaults.wildcard_policy),
            observer_queue_capacity,
            cors_origins: lookup("CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
        })
    }

    /// Full producer bind address (addr:port)
    pub fn tcp_bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.tcp_port)
    }

    /// Full observer bind address (addr:port)
    pub fn ws_bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.ws_port)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw))),
        None => Ok(None),
    }
}

fn parse_port<F>(lookup: &F, key: &str) -> Result<Option<u16>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var(lookup, key).map_err(|_| ConfigError::InvalidPort(key.to_string()))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number in {0}")]
    InvalidPort(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
