//! # mk-config
//!
//! Layered settings for the Mask server: built-in defaults, then an
//! optional `mask.toml`, then `MASK__*` environment variables
//! (e.g. `MASK__SERVER__PORT=9000`). A `.env` file is honoured.

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Config file looked up next to the working directory (extension optional).
pub const DEFAULT_CONFIG_FILE: &str = "mask";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Origin share links are rendered against
    pub public_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub sqlite_url: String,
    /// Snapshots buffered per subscriber before it starts skipping
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set
    pub filter: String,
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Loads `.env`, `mask.{toml,yaml,json}` if present, and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        let config = defaults()?
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix("MASK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::validated(config.try_deserialize()?)
    }

    /// Defaults overlaid with a TOML document. Environment is ignored.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config = defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Self::validated(config.try_deserialize()?)
    }

    pub fn bind_addr(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }

    fn validated(settings: Self) -> Result<Self, ConfigError> {
        if settings.store.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid(
                "store.broadcast_capacity must be at least 1".into(),
            ));
        }
        if settings.store.backend == StoreBackend::Sqlite && settings.store.sqlite_url.is_empty() {
            return Err(ConfigError::Invalid(
                "store.sqlite_url is required for the sqlite backend".into(),
            ));
        }
        Ok(settings)
    }
}

fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Ok(Config::builder()
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080_i64)?
        .set_default("server.public_origin", "http://127.0.0.1:8080")?
        .set_default("store.backend", "memory")?
        .set_default("store.sqlite_url", "sqlite:mask.db")?
        .set_default("store.broadcast_capacity", 64_i64)?
        .set_default("log.filter", "info")?
        .set_default("log.json", false)?)
}
