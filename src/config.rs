//! Configuration management for scribegate.
//!
//! Settings are read once at startup from an optional `config.yaml` and
//! `SCRIBEGATE_`-prefixed environment variables, then held immutably in
//! [`crate::AppState`].

use serde::Deserialize;
use std::path::PathBuf;

pub const APPLE_ISSUER: &str = "https://appleid.apple.com";
pub const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
pub const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Application configuration settings.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Port number the server will listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body, in bytes.
    #[serde(default = "default_upload_limit")]
    pub upload_limit_bytes: usize,
    /// Where uploads are staged. Defaults to the OS temp directory.
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
    /// Run the noise gate over WAV uploads before transcription.
    #[serde(default)]
    pub denoise: bool,
    /// Sign in with Apple. Disabled when absent.
    #[serde(default)]
    pub apple: Option<AppleConfig>,
    /// Firebase Authentication. Disabled when absent.
    #[serde(default)]
    pub firebase: Option<FirebaseConfig>,
    #[serde(default)]
    pub jwks: JwksConfig,
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppleConfig {
    /// The app's bundle id; Apple identity tokens carry it as `aud`.
    pub bundle_id: String,
    #[serde(default = "default_apple_issuer")]
    pub issuer: String,
    #[serde(default = "default_apple_jwks_url")]
    pub jwks_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FirebaseConfig {
    /// The Firebase project id, used as `aud` and as the issuer suffix.
    pub project_id: String,
    #[serde(default = "default_firebase_jwks_url")]
    pub jwks_url: String,
}

impl FirebaseConfig {
    pub fn issuer(&self) -> String {
        format!("{FIREBASE_ISSUER_PREFIX}{}", self.project_id)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct JwksConfig {
    /// How long a fetched key set is reused. `0` re-fetches on every verification.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Upper bound on a single key set fetch.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Minimum gap between refetches of a cached set triggered by an unknown `kid`.
    #[serde(default = "default_min_refresh_interval")]
    pub min_refresh_interval_secs: u64,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            fetch_timeout_secs: default_fetch_timeout(),
            min_refresh_interval_secs: default_min_refresh_interval(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_openai_timeout")]
    pub timeout_secs: u64,
    /// Also run name extraction on every transcription.
    #[serde(default)]
    pub extract_names: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoggingFormat {
    Json,
    Pretty,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub level: LogLevel,
    pub axum_level: LogLevel,
    pub format: LoggingFormat,
    pub otlp_enabled: bool,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            axum_level: LogLevel::Warn,
            format: LoggingFormat::Json,
            otlp_enabled: false,
            service_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_upload_limit() -> usize {
    25 * 1024 * 1024
}

fn default_apple_issuer() -> String {
    APPLE_ISSUER.to_string()
}

fn default_apple_jwks_url() -> String {
    APPLE_JWKS_URL.to_string()
}

fn default_firebase_jwks_url() -> String {
    FIREBASE_JWKS_URL.to_string()
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_min_refresh_interval() -> u64 {
    10
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4".to_string()
}

fn default_openai_timeout() -> u64 {
    60
}

/// Loads configuration from `config.yaml` (if present) and the environment.
///
/// # Errors
/// Fails if a source cannot be read or the merged values don't match [`Settings`].
pub fn load_config() -> Result<Settings, config::ConfigError> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::with_prefix("SCRIBEGATE")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .inspect_err(|e| tracing::error!("Failed to build configuration: {}", e))?;

    cfg.try_deserialize::<Settings>()
        .inspect_err(|e| tracing::error!("Failed to deserialize configuration: {}", e))
}
