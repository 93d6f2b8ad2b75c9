//! Application configuration: JSON file plus environment overrides.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::trading::{normalize_symbol, TrailingStopConfig};

pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 4;

/// Configuration loading failures. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file '{0}' not found")]
    NotFound(PathBuf),

    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file '{path}' is not valid JSON: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config is missing required key '{0}'")]
    MissingKey(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Exchange credentials and trailing-stop parameters (the `bitget` object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitgetSettings {
    #[serde(rename = "apiKey", default)]
    pub api_key: String,

    #[serde(default)]
    pub secret: String,

    /// API passphrase
    #[serde(default)]
    pub password: String,

    #[serde(flatten)]
    pub trailing: TrailingStopConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub bitget: BitgetSettings,

    /// Feishu custom-bot webhook; notifications are disabled without it
    #[serde(default)]
    pub feishu_webhook: Option<String>,

    /// Seconds between polling cycles
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval: u64,
}

fn default_monitor_interval() -> u64 {
    DEFAULT_MONITOR_INTERVAL_SECS
}

impl AppConfig {
    /// Load from `path`, then apply process environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load from `path` using `env` to look up override variables.
    pub fn load_with_env<F>(path: impl AsRef<Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::parse(&raw).map_err(|e| match e {
            ParseFailure::Syntax(source) => ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            },
            ParseFailure::Config(err) => err,
        })?;

        config.apply_env_overrides(env);
        config.finish()?;

        debug!(
            path = %path.display(),
            interval = config.monitor_interval,
            blacklist = config.bitget.trailing.blacklist.len(),
            "Config loaded"
        );
        Ok(config)
    }

    fn parse(raw: &str) -> Result<Self, ParseFailure> {
        let value: Value = serde_json::from_str(raw).map_err(ParseFailure::Syntax)?;
        serde_json::from_value(value).map_err(|e| ParseFailure::Config(classify(e)))
    }

    fn apply_env_overrides<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = env("BITGET_API_KEY") {
            self.bitget.api_key = v;
        }
        if let Some(v) = env("BITGET_SECRET") {
            self.bitget.secret = v;
        }
        if let Some(v) = env("BITGET_PASSWORD") {
            self.bitget.password = v;
        }
        if let Some(v) = env("FEISHU_WEBHOOK") {
            self.feishu_webhook = Some(v);
        }
    }

    /// Normalize and validate after overrides are in place.
    fn finish(&mut self) -> Result<(), ConfigError> {
        if self.bitget.api_key.is_empty() {
            return Err(ConfigError::MissingKey("bitget.apiKey".to_string()));
        }
        if self.bitget.secret.is_empty() {
            return Err(ConfigError::MissingKey("bitget.secret".to_string()));
        }
        if self.monitor_interval == 0 {
            return Err(ConfigError::Invalid(
                "monitor_interval must be at least 1 second".to_string(),
            ));
        }

        self.bitget.trailing.blacklist = self
            .bitget
            .trailing
            .blacklist
            .iter()
            .map(|s| normalize_symbol(s))
            .collect();
        self.feishu_webhook = self
            .feishu_webhook
            .take()
            .filter(|w| !w.trim().is_empty());

        self.bitget.trailing.validate().map_err(ConfigError::Invalid)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval)
    }

    pub fn trailing(&self) -> &TrailingStopConfig {
        &self.bitget.trailing
    }
}

enum ParseFailure {
    Syntax(serde_json::Error),
    Config(ConfigError),
}

/// Map a serde structure error to a config error. serde reports missing
/// fields as "missing field `name`".
fn classify(err: serde_json::Error) -> ConfigError {
    let message = err.to_string();
    if let Some(rest) = message.strip_prefix("missing field `") {
        if let Some(end) = rest.find('`') {
            return ConfigError::MissingKey(rest[..end].to_string());
        }
    }
    ConfigError::Invalid(message)
}
