//! Configuration management for the schedule enforcer.
//!
//! Configuration can be set via environment variables:
//! - `GROQ_API_KEY` - Optional. Vision backend key; without it, verification
//!   runs in mock mode.
//! - `GROQ_MODEL` - Optional. Vision model id. Defaults to the Llama 4 Scout
//!   vision model.
//! - `DATABASE_PATH` - Optional. SQLite file path. Defaults to
//!   `schedule_enforcer.db`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `POLL_INTERVAL_SECS` - Optional. Schedule poll period. Defaults to `30`.
//! - `ALARM_PERIOD_MS` - Optional. Alarm pulse period. Defaults to `1000`.
//! - `MAX_VERIFY_ATTEMPTS` - Optional. Failed attempts before a task is
//!   marked failed. Unset means tasks are never auto-failed.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::vision::DEFAULT_GROQ_MODEL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Vision backend API key; `None` selects mock verification
    pub groq_api_key: Option<String>,

    /// Vision model identifier
    pub groq_model: String,

    /// SQLite database file
    pub database_path: PathBuf,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// How often the schedule engine compares wall-clock time to tasks
    pub poll_interval: Duration,

    /// Delay between alarm pulses while sounding
    pub alarm_period: Duration,

    /// Failed verification attempts before a task is auto-failed
    /// (`None` = never)
    pub max_verify_attempts: Option<u32>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparseable numeric variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let groq_api_key = std::env::var("GROQ_API_KEY").ok().filter(|k| !k.is_empty());

        let groq_model =
            std::env::var("GROQ_MODEL").unwrap_or_else(|_| DEFAULT_GROQ_MODEL.to_string());

        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("schedule_enforcer.db"));

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let poll_interval_secs: u64 = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("POLL_INTERVAL_SECS".to_string(), format!("{}", e))
            })?;

        let alarm_period_ms: u64 = std::env::var("ALARM_PERIOD_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("ALARM_PERIOD_MS".to_string(), format!("{}", e))
            })?;

        let max_verify_attempts = match std::env::var("MAX_VERIFY_ATTEMPTS") {
            Ok(raw) => Some(raw.parse().map_err(|e| {
                ConfigError::InvalidValue("MAX_VERIFY_ATTEMPTS".to_string(), format!("{}", e))
            })?),
            Err(_) => None,
        };

        Ok(Self {
            groq_api_key,
            groq_model,
            database_path,
            host,
            port,
            poll_interval: Duration::from_secs(poll_interval_secs),
            alarm_period: Duration::from_millis(alarm_period_ms),
            max_verify_attempts,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(database_path: PathBuf) -> Self {
        Self {
            groq_api_key: None,
            groq_model: DEFAULT_GROQ_MODEL.to_string(),
            database_path,
            host: "127.0.0.1".to_string(),
            port: 8000,
            poll_interval: Duration::from_secs(30),
            alarm_period: Duration::from_secs(1),
            max_verify_attempts: None,
        }
    }
}
