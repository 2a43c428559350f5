//! Configuration module for the tracker backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::backend::RemoteOptions;

pub const DEFAULT_PASSPHRASE: &str = "monster";
pub const DEFAULT_INSIGHT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_INSIGHT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_INSIGHT_SUBJECT: &str = "Reuben";

/// Which persistence variant to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMode {
    /// Key-value store in a local SQLite file
    Local { db_path: PathBuf },
    /// Realtime database; `None` when no URL was configured
    Remote(Option<RemoteOptions>),
}

/// Settings for the AI consumption report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub subject: String,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_INSIGHT_MODEL.to_string(),
            base_url: DEFAULT_INSIGHT_BASE_URL.to_string(),
            subject: DEFAULT_INSIGHT_SUBJECT.to_string(),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Persistence variant and its parameters
    pub backend: BackendMode,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Shared admin passphrase
    pub admin_passphrase: String,
    pub insight: InsightConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidBindAddr(String),
    UnknownBackend(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidBindAddr(raw) => {
                write!(f, "Invalid MONSTER_BIND_ADDR format: {}", raw)
            }
            ConfigError::UnknownBackend(raw) => write!(
                f,
                "Unknown MONSTER_BACKEND {:?} (expected \"local\" or \"remote\")",
                raw
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables, after reading `.env`
    /// if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Empty values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("MONSTER_BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => BackendMode::Local {
                db_path: get("MONSTER_DB_PATH")
                    .unwrap_or_else(|| "./data/monster.sqlite".to_string())
                    .into(),
            },
            "remote" => BackendMode::Remote(get("MONSTER_REMOTE_URL").map(|url| RemoteOptions {
                url,
                auth_token: get("MONSTER_REMOTE_AUTH"),
            })),
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        let raw_addr = get("MONSTER_BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let bind_addr = raw_addr
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(raw_addr.clone()))?;

        let log_level = get("MONSTER_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let admin_passphrase =
            get("MONSTER_ADMIN_PASSPHRASE").unwrap_or_else(|| DEFAULT_PASSPHRASE.to_string());

        let defaults = InsightConfig::default();
        let insight = InsightConfig {
            api_key: get("GEMINI_API_KEY").or_else(|| get("API_KEY")),
            model: get("MONSTER_INSIGHT_MODEL").unwrap_or(defaults.model),
            base_url: get("MONSTER_INSIGHT_BASE_URL").unwrap_or(defaults.base_url),
            subject: get("MONSTER_INSIGHT_SUBJECT").unwrap_or(defaults.subject),
        };

        Ok(Self {
            backend,
            bind_addr,
            log_level,
            admin_passphrase,
            insight,
        })
    }
}
