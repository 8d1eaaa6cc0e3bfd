//! Application Configuration Module
//!
//! Loads the `murmur` binary's settings from environment variables (a `.env`
//! file is honoured) into a single struct shared by every subcommand.

use murmur_realtime::SessionConfig;
use murmur_realtime::session::consts;
use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

pub const TOKEN_VAR: &str = "MURMUR_TOKEN";
pub const STATE_DIR_VAR: &str = "MURMUR_STATE_DIR";
pub const MAX_RECONNECTS_VAR: &str = "MURMUR_MAX_RECONNECTS";
pub const BASE_DELAY_VAR: &str = "MURMUR_BASE_DELAY_MS";
pub const HANDSHAKE_TIMEOUT_VAR: &str = "MURMUR_HANDSHAKE_TIMEOUT_MS";
pub const INPUT_DEVICE_VAR: &str = "MURMUR_INPUT_DEVICE";
pub const OUTPUT_DEVICE_VAR: &str = "MURMUR_OUTPUT_DEVICE";
/// `granted` or `denied`. Absent means denied.
pub const PERMISSION_VAR: &str = "MURMUR_MIC_PERMISSION";
pub const LOG_LEVEL_VAR: &str = "RUST_LOG";

/// Captured PCM16 chunks waiting to be sent.
pub const AUDIO_QUEUE_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct Config {
    pub endpoint: String,
    pub token: Option<SecretString>,
    pub state_dir: PathBuf,
    pub max_reconnect_attempts: u32,
    pub base_delay: Duration,
    pub handshake_timeout: Duration,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    // *   `MURMUR_ENDPOINT`: (Optional) Backend WebSocket URL. Defaults to `wss://localhost:8080/stream`.
    // *   `MURMUR_TOKEN`: Bearer token. Required by `listen` and `restart` only.
    // *   `MURMUR_STATE_DIR`: (Optional) Where the monitoring preference lives. Defaults to `$HOME/.local/state/murmur`.
    // *   `MURMUR_MAX_RECONNECTS`, `MURMUR_BASE_DELAY_MS`, `MURMUR_HANDSHAKE_TIMEOUT_MS`: (Optional) Reconnect policy.
    // *   `MURMUR_INPUT_DEVICE`, `MURMUR_OUTPUT_DEVICE`: (Optional) Audio device names. Default devices otherwise.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup(consts::ENDPOINT_VAR)
            .unwrap_or_else(|| consts::DEFAULT_ENDPOINT.to_string());
        let token = lookup(TOKEN_VAR)
            .filter(|token| !token.is_empty())
            .map(SecretString::from);

        let state_dir = match lookup(STATE_DIR_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = lookup("HOME").ok_or_else(|| {
                    ConfigError::MissingVar(format!("{} (or HOME) must be set", STATE_DIR_VAR))
                })?;
                PathBuf::from(home).join(".local/state/murmur")
            }
        };

        let max_reconnect_attempts = parse_var(
            &lookup,
            MAX_RECONNECTS_VAR,
            consts::DEFAULT_MAX_RECONNECT_ATTEMPTS,
        )?;
        let base_delay = parse_millis(&lookup, BASE_DELAY_VAR, consts::DEFAULT_BASE_DELAY)?;
        let handshake_timeout = parse_millis(
            &lookup,
            HANDSHAKE_TIMEOUT_VAR,
            consts::DEFAULT_HANDSHAKE_TIMEOUT,
        )?;

        let log_level_str = lookup(LOG_LEVEL_VAR).unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            endpoint,
            token,
            state_dir,
            max_reconnect_attempts,
            base_delay,
            handshake_timeout,
            input_device: lookup(INPUT_DEVICE_VAR),
            output_device: lookup(OUTPUT_DEVICE_VAR),
            log_level,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::builder()
            .with_endpoint(&self.endpoint)
            .with_max_reconnect_attempts(self.max_reconnect_attempts)
            .with_base_delay(self.base_delay)
            .with_handshake_timeout(self.handshake_timeout)
            .build()
    }

    /// The bearer token, for subcommands that open a session.
    pub fn token(&self) -> Result<&SecretString, ConfigError> {
        self.token
            .as_ref()
            .ok_or_else(|| ConfigError::MissingVar(TOKEN_VAR.to_string()))
    }
}

fn parse_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value,
        }),
    }
}

fn parse_millis<F>(lookup: &F, var: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(_) => parse_var(lookup, var, 0u64).map(Duration::from_millis),
    }
}
