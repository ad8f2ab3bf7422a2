use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all engine configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// WebSocket URL of the tutoring service.
    pub service_url: String,
    /// Bound on transport open, handshake included.
    pub connect_timeout: Duration,
    /// Bound on waiting for the authentication acknowledgement.
    pub auth_timeout: Duration,
    /// Fixed backoff before the single reconnection attempt.
    pub reconnect_delay: Duration,
    /// Sample rate of outbound microphone frames on the wire.
    pub capture_sample_rate: u32,
    /// Sample rate the service uses for synthesized speech.
    pub playback_sample_rate: u32,
    pub log_level: Level,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_url: "ws://127.0.0.1:9100/session".to_string(),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_millis(2500),
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
            log_level: Level::INFO,
        }
    }
}

fn duration_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| {
                ConfigError::InvalidValue(name.to_string(), format!("'{raw}' is not milliseconds"))
            }),
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let defaults = Self::default();

        let service_url = std::env::var("TUTOR_SERVICE_URL")
            .map_err(|_| ConfigError::MissingVar("TUTOR_SERVICE_URL".to_string()))?;

        let connect_timeout =
            duration_var("TUTOR_CONNECT_TIMEOUT_MS", defaults.connect_timeout)?;
        let auth_timeout = duration_var("TUTOR_AUTH_TIMEOUT_MS", defaults.auth_timeout)?;
        let reconnect_delay =
            duration_var("TUTOR_RECONNECT_DELAY_MS", defaults.reconnect_delay)?;

        let log_level_str = std::env::var("TUTOR_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "TUTOR_LOG".to_string(),
                format!("'{log_level_str}' is not a valid log level"),
            )
        })?;

        Ok(Self {
            service_url,
            connect_timeout,
            auth_timeout,
            reconnect_delay,
            capture_sample_rate: defaults.capture_sample_rate,
            playback_sample_rate: defaults.playback_sample_rate,
            log_level,
        })
    }
}
