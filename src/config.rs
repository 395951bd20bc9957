// =============================================================================
// Gateway Configuration: settings file + environment, validated at startup
// =============================================================================
//
// One `GatewayConfig` is built in `main` and handed to `AppState`; nothing
// reads the environment after that. Sources, lowest precedence first:
//
//   1. serde defaults
//   2. optional JSON settings file (`GATEWAY_CONFIG_PATH`, default
//      `gateway_config.json`)
//   3. process environment (`main` loads `.env` into it via dotenv)
//
// The upstream base URL has no default; a config without one is rejected.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::market_data::KlineRowFormat;

pub const DEFAULT_SETTINGS_PATH: &str = "gateway_config.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_keepalive_connections() -> usize {
    5
}

fn default_max_connections() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BASE_URL_API_CONNECT is not set (environment, .env or settings file)")]
    MissingBaseUrl,
    #[error("invalid upstream base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// HttpClientSettings
// =============================================================================

/// Limits applied to every per-request upstream client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpClientSettings {
    /// Idle keep-alive connections retained by the pool.
    #[serde(default = "default_max_keepalive_connections")]
    pub max_keepalive_connections: usize,

    /// Upper bound on in-flight requests through one client.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Whole-call timeout (connect + headers + body).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl HttpClientSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            max_keepalive_connections: default_max_keepalive_connections(),
            max_connections: default_max_connections(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// =============================================================================
// GatewayConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the connect market-data service, without trailing slash.
    #[serde(default)]
    pub base_url_api_connect: String,

    /// Address the gateway listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Row contract of the upstream `/klines` response.
    #[serde(default)]
    pub kline_row_format: KlineRowFormat,

    #[serde(default)]
    pub http: HttpClientSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url_api_connect: String::new(),
            bind_addr: default_bind_addr(),
            kline_row_format: KlineRowFormat::default(),
            http: HttpClientSettings::default(),
        }
    }
}

fn env_str(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    env(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match env_str(env, key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(None),
    }
}

impl GatewayConfig {
    /// Load from the settings file named by `GATEWAY_CONFIG_PATH` (if it
    /// exists) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("GATEWAY_CONFIG_PATH")
            .unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
        Self::from_sources(Path::new(&path), |key| std::env::var(key).ok())
    }

    /// Build a config from an optional settings file at `path` overlaid with
    /// variables looked up through `env`.
    pub fn from_sources(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str::<Self>(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            debug!(path = %path.display(), "no settings file, using environment only");
            Self::default()
        };

        if let Some(url) = env_str(&env, "BASE_URL_API_CONNECT") {
            config.base_url_api_connect = url;
        }
        if let Some(addr) = env_str(&env, "GATEWAY_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(format) = env_parse::<KlineRowFormat>(&env, "KLINE_ROW_FORMAT")? {
            config.kline_row_format = format;
        }
        if let Some(n) = env_parse::<usize>(&env, "HTTP_MAX_KEEPALIVE")? {
            config.http.max_keepalive_connections = n;
        }
        if let Some(n) = env_parse::<usize>(&env, "HTTP_MAX_CONNECTIONS")? {
            config.http.max_connections = n;
        }
        if let Some(secs) = env_parse::<u64>(&env, "HTTP_TIMEOUT_SECS")? {
            config.http.timeout_secs = secs;
        }

        config.validate()?;

        info!(
            base_url = %config.base_url_api_connect,
            bind_addr = %config.bind_addr,
            kline_row_format = %config.kline_row_format,
            timeout_secs = config.http.timeout_secs,
            "gateway config loaded"
        );

        Ok(config)
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        let url = self.base_url_api_connect.trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }

        let parsed = reqwest::Url::parse(&url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url,
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        self.base_url_api_connect = url;

        if self.http.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HTTP_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HTTP_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}
