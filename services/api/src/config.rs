//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub stt_model: String,
    pub translation_model: String,
    pub tts_voice: String,
    /// Root directory backing the filesystem artifact store.
    pub artifact_root: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Language codes jobs may target.
    pub supported_languages: Vec<String>,
    /// Worker poll interval for pending tasks.
    pub poll_interval: Duration,
    /// Maximum pipelines a worker process runs at once.
    pub worker_concurrency: usize,
    /// In-flight tasks untouched this long are reclaimable (crash recovery).
    pub claim_staleness: Duration,
    /// Attempts per vendor call before a stage is marked failed.
    pub max_vendor_attempts: u32,
    /// Base delay for vendor retry backoff; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Maximum characters per translation request chunk.
    pub translation_chunk_chars: usize,
    /// Allowed difference between voice and background track durations.
    pub duration_tolerance_secs: f64,
    /// How long completed artifacts remain downloadable.
    pub artifact_retention_hours: i64,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Vendor Settings ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let stt_model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let translation_model =
            std::env::var("TRANSLATION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let tts_voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| "alloy".to_string());

        // --- Load Media and Storage Settings ---
        let artifact_root = std::env::var("ARTIFACT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./artifacts"));
        let ffmpeg_path = std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string());
        let ffprobe_path = std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string());

        let supported_languages = std::env::var("SUPPORTED_LANGUAGES")
            .unwrap_or_else(|_| "en,es,fr,de,it,pt,ja,ko,zh,hi".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if supported_languages.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SUPPORTED_LANGUAGES".to_string(),
                "must list at least one language code".to_string(),
            ));
        }

        // --- Load Worker Tunables ---
        let poll_interval = Duration::from_secs(parse_var("POLL_INTERVAL_SECS", 5)?);
        let worker_concurrency = parse_var("WORKER_CONCURRENCY", 3)? as usize;
        let claim_staleness = Duration::from_secs(parse_var("CLAIM_STALENESS_SECS", 300)?);
        let max_vendor_attempts = parse_var("MAX_VENDOR_ATTEMPTS", 3)? as u32;
        let retry_base_delay = Duration::from_millis(parse_var("RETRY_BASE_DELAY_MS", 500)?);
        let translation_chunk_chars = parse_var("TRANSLATION_CHUNK_CHARS", 4000)? as usize;
        let duration_tolerance_secs =
            parse_float_var("DURATION_TOLERANCE_SECS", 30.0)?;
        let artifact_retention_hours = parse_var("ARTIFACT_RETENTION_HOURS", 48)? as i64;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            stt_model,
            translation_model,
            tts_voice,
            artifact_root,
            ffmpeg_path,
            ffprobe_path,
            supported_languages,
            poll_interval,
            worker_concurrency,
            claim_staleness,
            max_vendor_attempts,
            retry_base_delay,
            translation_chunk_chars,
            duration_tolerance_secs,
            artifact_retention_hours,
        })
    }
}

fn parse_var(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_float_var(name: &str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse::<f64>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
