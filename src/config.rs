//! Engine Configuration
//!
//! Settings are read from a YAML file. Every field has a default, so an
//! empty file (or no file at the default location) gives a working
//! single-node setup.
//!
//! # Config Resolution Priority
//!
//! 1. `--config PATH` on the command line
//! 2. `$RUNBOOK_ENGINE_CONF_HOME/engine.yaml`
//! 3. `/opt/runbook-engine/conf/engine.yaml`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the configuration directory.
pub const CONF_HOME_VAR: &str = "RUNBOOK_ENGINE_CONF_HOME";

/// Configuration file name inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "engine.yaml";

/// Lazily-resolved path of the default configuration file.
pub static DEFAULT_CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(home) = std::env::var(CONF_HOME_VAR) {
        if !home.trim().is_empty() {
            let path = PathBuf::from(home).join(CONFIG_FILE_NAME);
            info!("Using config from ${}: {}", CONF_HOME_VAR, path.display());
            return path;
        }
    }

    let path = PathBuf::from("/opt/runbook-engine/conf").join(CONFIG_FILE_NAME);
    debug!("Using default config path: {}", path.display());
    path
});

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Completion waiter settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WaiterConfig {
    /// Delay between polls of an action execution
    pub poll_interval_ms: u64,

    /// Polls before giving up on an action execution
    pub max_attempts: u32,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            max_attempts: 10,
        }
    }
}

impl WaiterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    File,
    Memory,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Root directory of the file backend
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from("/var/lib/runbook-engine/store"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FabricBackend {
    Kubectl,
    /// Render job manifests and log them without applying
    DryRun,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FabricConfig {
    pub backend: FabricBackend,
    pub kubectl_path: String,
    pub namespace: String,
    pub image_pull_secret: Option<String>,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            backend: FabricBackend::Kubectl,
            kubectl_path: "kubectl".to_string(),
            namespace: "testing".to_string(),
            image_pull_secret: Some("regcred".to_string()),
        }
    }
}

/// Top-level engine configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Address the HTTP surface binds to
    pub listen_addr: String,

    /// Base URL dispatched units post their results to
    pub postback_base_url: String,

    /// Most steps a single workflow run may dispatch
    pub max_steps: usize,

    pub waiter: WaiterConfig,
    pub store: StoreConfig,
    pub fabric: FabricConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            postback_base_url: "http://localhost:8080/runner".to_string(),
            max_steps: 100,
            waiter: WaiterConfig::default(),
            store: StoreConfig::default(),
            fabric: FabricConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates configuration from YAML text.
    pub fn from_yaml(yaml_content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = if yaml_content.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(yaml_content).map_err(|source| ConfigError::Parse {
                path: origin.to_string(),
                source,
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file.
    ///
    /// With `explicit` set, a missing file is an error. Otherwise a missing
    /// file gives the defaults.
    pub fn load(path: &Path, explicit: bool) -> Result<Self, ConfigError> {
        if !explicit && !path.exists() {
            info!(
                "No config file at {}, using defaults",
                path.display()
            );
            return Ok(EngineConfig::default());
        }

        let yaml_content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::from_yaml(&yaml_content, &path.display().to_string())?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Loads the file named on the command line, or the default file.
    pub fn resolve(cli_path: Option<&str>) -> Result<Self, ConfigError> {
        match cli_path {
            Some(path) => Self::load(Path::new(path), true),
            None => Self::load(&DEFAULT_CONFIG_PATH, false),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.waiter.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "waiter.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if self.postback_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "postback_base_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
