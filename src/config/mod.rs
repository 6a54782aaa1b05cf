//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::util::time::SIMULATION_TPS;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// HMAC secret for session token verification
    pub jwt_secret: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// Base URL of the statistics service; results are dropped when unset
    pub stats_url: Option<String>,
    pub stats_api_key: Option<String>,

    /// Room simulation rate
    pub tick_rate: u32,
    pub match_interval: Duration,
    pub room_sweep_interval: Duration,
    pub outbound_queue_size: usize,
    pub max_rooms: usize,
    /// How long shutdown waits for room tasks
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            jwt_secret: lookup("JWT_SECRET")
                .filter(|s| !s.is_empty())
                .ok_or(ConfigError::Missing("JWT_SECRET"))?,
            client_origin: lookup("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),

            stats_url: lookup("STATS_URL").filter(|s| !s.is_empty()),
            stats_api_key: lookup("STATS_API_KEY").filter(|s| !s.is_empty()),

            tick_rate: parse_or(&lookup, "TICK_RATE", SIMULATION_TPS)?,
            match_interval: Duration::from_millis(parse_or(&lookup, "MATCH_INTERVAL_MS", 1000)?),
            room_sweep_interval: Duration::from_secs(parse_or(&lookup, "ROOM_SWEEP_SECS", 10)?),
            outbound_queue_size: parse_or(&lookup, "OUTBOUND_QUEUE_SIZE", 256)?,
            max_rooms: parse_or(&lookup, "MAX_ROOMS", 500)?,
            shutdown_grace: Duration::from_secs(parse_or(&lookup, "SHUTDOWN_GRACE_SECS", 5)?),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
