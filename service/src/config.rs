//! Service configuration loading
//!
//! Loads configuration from `~/.config/intake/service.toml` (or the
//! `INTAKE_CONFIG` env var). A missing file means defaults.

use crate::errors::ConfigError;
use crate::lifecycle::{LifecycleSettings, MAX_EXPIRY_DAYS, MIN_EXPIRY_DAYS};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration for the intake service
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Path to the SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Socket to listen on; defaults to [`crate::default_socket_path`]
    #[serde(default)]
    pub socket_path: Option<String>,

    /// Base URL that public form links are built from
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

fn default_db_path() -> String {
    dirs::data_dir()
        .map(|d| d.join("intake").join("intake.db").to_string_lossy().into_owned())
        .unwrap_or_else(|| "intake.db".to_string())
}

fn default_pool_size() -> u32 {
    8
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

/// Lifecycle policy settings
#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    /// Expiry applied when a create request does not specify one
    #[serde(default = "default_expiry_days")]
    pub default_expiry_days: f64,
}

fn default_expiry_days() -> f64 {
    7.0
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_expiry_days: default_expiry_days(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pool_size: default_pool_size(),
            socket_path: None,
            public_base_url: default_public_base_url(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "INTAKE_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "service.toml";

    /// Load configuration from file
    ///
    /// Resolution order:
    /// 1. `INTAKE_CONFIG` environment variable
    /// 2. `~/.config/intake/service.toml`
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(path = %path.display(), "service config not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::with_source(format!("failed to read config at {}", path.display()), e)
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let cfg: ServiceConfig = toml::from_str(contents)
            .map_err(|e| ConfigError::with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("intake")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::new("pool_size must be at least 1"));
        }

        if self.public_base_url.trim().is_empty() {
            return Err(ConfigError::new("public_base_url must not be empty"));
        }

        let days = self.lifecycle.default_expiry_days;
        if !(MIN_EXPIRY_DAYS..=MAX_EXPIRY_DAYS).contains(&days) {
            return Err(ConfigError::new(format!(
                "lifecycle.default_expiry_days must be between {MIN_EXPIRY_DAYS} and \
                 {MAX_EXPIRY_DAYS}, got {days}"
            )));
        }

        Ok(())
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(crate::default_socket_path)
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            public_base_url: self.public_base_url.trim_end_matches('/').to_string(),
            default_expiry_days: self.lifecycle.default_expiry_days,
        }
    }
}
