//! Configuration for the prediction gateway.

use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub models: ModelsConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Per-request timeout for one-shot endpoints. 0 disables it.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Shared-secret authentication.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// The single API key every caller must present as `Authorization: Key <api_key>`.
    pub api_key: String,
    /// Path prefixes served without authentication (one-shot requests only).
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

impl AuthConfig {
    pub fn secret(&self) -> &str {
        &self.api_key
    }

    pub fn exempt_paths(&self) -> &[String] {
        &self.exempt_paths
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Upper bound on concurrent calls into each model. 0 = unbounded, 1 = serialized.
    #[serde(default)]
    pub max_concurrent_calls: usize,
    /// Check that both models report AVAILABLE before serving.
    #[serde(default = "default_true")]
    pub verify_on_startup: bool,
    pub binary: ModelEndpointConfig,
    pub multiclass: ModelEndpointConfig,
}

/// A model served over the TensorFlow Serving REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEndpointConfig {
    /// e.g. `http://localhost:8501`
    pub base_url: String,
    /// Model name as registered with the serving runtime.
    pub name: String,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Close a session that sends nothing for this long. 0 disables it.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl StreamConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.idle_timeout_secs)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5001
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_request_timeout() -> u64 {
    60
}
fn default_exempt_paths() -> Vec<String> {
    ["/docs", "/openapi.json", "/metrics", "/health"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}
fn default_true() -> bool {
    true
}
fn default_model_timeout() -> u64 {
    30
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from `config.toml` (if present) and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (WILDLENS__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(File::with_name("config").required(false))
    }

    /// Load configuration from an explicit file, still allowing environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::build(File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("logging.level", default_log_level())?
            .add_source(file)
            .add_source(
                Environment::with_prefix("WILDLENS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.exempt_paths"),
            )
            .build()?;

        config.try_deserialize()
    }
}
