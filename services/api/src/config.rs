use std::net::SocketAddr;
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

pub const DEFAULT_UPSTREAM_URL: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

/// Connection settings for the upstream voice-agent service.
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub url: String,
    pub api_key: String,
    pub agent_id: String,
    pub connect_timeout: Duration,
}

/// Settings for the translation of finalized segments.
#[derive(Clone, Debug)]
pub struct TranslationConfig {
    /// `None` disables the provider; every final segment then carries the
    /// "translation unavailable" sentinel.
    pub api_key: Option<String>,
    pub source_lang: String,
    pub target_lang: String,
    pub timeout: Duration,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub upstream: UpstreamConfig,
    pub translation: TranslationConfig,
    pub channel_prefix: String,
    pub broadcast_capacity: usize,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let upstream = UpstreamConfig {
            url: std::env::var("UPSTREAM_URL").unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string()),
            api_key: required("ELEVENLABS_API_KEY")?,
            agent_id: required("ELEVENLABS_AGENT_ID")?,
            connect_timeout: millis("UPSTREAM_CONNECT_TIMEOUT_MS", 10_000)?,
        };

        let translation = TranslationConfig {
            api_key: std::env::var("GOOGLE_TRANSLATE_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            source_lang: std::env::var("TRANSLATE_SOURCE_LANG").unwrap_or_else(|_| "ja".to_string()),
            target_lang: std::env::var("TRANSLATE_TARGET_LANG").unwrap_or_else(|_| "en".to_string()),
            timeout: millis("TRANSLATE_TIMEOUT_MS", 3_000)?,
        };

        let channel_prefix =
            std::env::var("CHANNEL_PREFIX").unwrap_or_else(|_| "conversation-".to_string());

        let broadcast_capacity = match std::env::var("BROADCAST_CAPACITY") {
            Ok(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "BROADCAST_CAPACITY".to_string(),
                        format!("'{}' is not a positive integer", raw),
                    ));
                }
            },
            Err(_) => 256,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            upstream,
            translation,
            channel_prefix,
            broadcast_capacity,
            log_level,
        })
    }
}

fn required(var: &str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(var.to_string())),
    }
}

fn millis(var: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    var.to_string(),
                    format!("'{}' is not a positive number of milliseconds", raw),
                )
            }),
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}
