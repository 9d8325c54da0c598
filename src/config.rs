//! Runtime configuration for completion-bridge.
//!
//! Configuration is loaded from a JSON file, with environment overrides
//! for the listen port and the backend API token.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Environment variable holding the backend API token.
pub const API_TOKEN_ENV: &str = "REPLICATE_API_TOKEN";

/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "PORT";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "completion-bridge", about = "OpenAI-compatible completions bridge")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address, overriding the configuration file.
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Generation backend configuration.
    pub backend: BackendConfig,

    /// Streaming behaviour.
    pub streaming: StreamingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:5010").
    pub listen: String,

    /// Model id reported in responses and by `/v1/models`.
    pub model_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5010".to_string(),
            model_name: "default".to_string(),
        }
    }
}

/// Replicate API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// API base URL.
    pub api_base: String,

    /// API token. Usually supplied through `REPLICATE_API_TOKEN`.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,

    /// Model used when a request does not name one.
    pub default_model: Option<String>,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.replicate.com/v1".to_string(),
            api_token: None,
            default_model: None,
            connect_timeout_secs: 10,
        }
    }
}

/// Event-stream pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// A choice's buffer is flushed once its window is older than this.
    pub max_interval_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { max_interval_ms: 50 }
    }
}

impl StreamingConfig {
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply `PORT` and `REPLICATE_API_TOKEN` from a variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(PORT_ENV) {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {PORT_ENV} {port:?}: {e}"))?;
            let host = self
                .server
                .listen
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or("0.0.0.0");
            self.server.listen = format!("{host}:{port}");
        }
        if let Some(token) = lookup(API_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.backend.api_token = Some(token);
        }
        Ok(())
    }
}
