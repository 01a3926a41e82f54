//! Configuration management for the EDV server
//!
//! Default config location: ~/.edv/config.toml

use anyhow::{anyhow, bail, Result};
use edv_storage::{EdvProvider, ProviderConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: ProviderConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Maximum request body size in bytes (default: 10MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8081".to_string()
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors: CorsConfig::default(),
            max_body_size: default_max_body_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Allowed origins. Use "*" for any origin.
    #[serde(default = "default_cors_origins")]
    pub origins: Vec<String>,
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            origins: default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter string
    /// Override with RUST_LOG env var
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics at GET /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info,edv=debug".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
            metrics_enabled: true,
        }
    }
}

/// Base directory for config and the default SQLite database (~/.edv).
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".edv")
}

pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

fn default_sqlite_path() -> PathBuf {
    default_data_dir().join("edv.db")
}

/// Expand tilde (~) in path to home directory
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Config {
    /// Load config from file path, or create default
    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let mut config: Config = toml::from_str(&content)?;
            config.expand_paths()?;
            Ok(config)
        } else {
            let config = Config::default();
            // Try to save default config
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = config.save(config_path);
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Expand ~ in all paths
    fn expand_paths(&mut self) -> Result<()> {
        if let ProviderConfig::Sqlite { ref mut path } = self.storage {
            *path = expand_tilde(path)?;
        }
        Ok(())
    }

    /// Switch storage backend by name, keeping settings that still apply.
    ///
    /// Switching to `sqlite` from another backend uses ~/.edv/edv.db.
    pub fn set_backend(&mut self, backend: &str) -> Result<()> {
        let storage = match (backend, &self.storage) {
            ("memory", ProviderConfig::Memory { .. })
            | ("sqlite", ProviderConfig::Sqlite { .. }) => return Ok(()),
            ("memory", _) => ProviderConfig::Memory {
                scan_queries: false,
            },
            ("sqlite", _) => ProviderConfig::Sqlite {
                path: default_sqlite_path(),
            },
            (other, _) => bail!(
                "Unknown storage backend '{}' (expected memory or sqlite)",
                other
            ),
        };
        self.storage = storage;
        Ok(())
    }

    /// Build the storage provider described by `[storage]`.
    pub fn create_provider(&self) -> Result<Arc<dyn EdvProvider>> {
        edv_storage::create_provider(&self.storage).map_err(|e| anyhow!("{}", e))
    }
}
