use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_rpc_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_rpc_timeout() -> u64 {
    60
}

fn default_ddl_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("/etc/fleetbook/ddl")]
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// RPC gateway base URL
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// RPC request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout: u64,

    /// Directories holding agent descriptors
    #[serde(default = "default_ddl_paths")]
    pub ddl_paths: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            rpc_timeout: default_rpc_timeout(),
            ddl_paths: default_ddl_paths(),
        }
    }
}

impl Config {
    /// Load `~/.fleetbook/config.yaml` and apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Override fields from `FLEETBOOK_*` variables.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("FLEETBOOK_RPC_URL").filter(|s| !s.is_empty()) {
            self.rpc_url = url;
        }

        if let Some(timeout) = var("FLEETBOOK_RPC_TIMEOUT").and_then(|s| s.parse().ok()) {
            self.rpc_timeout = timeout;
        }

        if let Some(paths) = var("FLEETBOOK_DDL_PATH").filter(|s| !s.is_empty()) {
            self.ddl_paths = split_paths(&paths);
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout)
    }

    fn get_config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".fleetbook").join("config.yaml"))
    }
}

/// Split a colon separated directory list.
pub fn split_paths(paths: &str) -> Vec<PathBuf> {
    paths
        .split(':')
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}
