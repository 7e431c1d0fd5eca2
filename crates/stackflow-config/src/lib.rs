//! Stackflow configuration
//!
//! Looks for a YAML file in this order:
//! 1. `STACKFLOW_CONFIG` environment variable (direct path)
//! 2. Current directory: `stackflow.local.yml`, `stackflow.yml`
//! 3. `~/.config/stackflow/config.yml` (global)

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use stackflow_cloud::Credentials;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV_VAR: &str = "STACKFLOW_CONFIG";

const LOCAL_CANDIDATES: [&str; 2] = ["stackflow.local.yml", "stackflow.yml"];

const DEFAULT_POOL_SIZE: usize = 4;

/// Stackflow config directory (`~/.config/stackflow`)
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow"))
}

/// Locate the configuration file
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points at missing file {}", CONFIG_ENV_VAR, path.display());
    }

    let current_dir = std::env::current_dir()?;
    for filename in &LOCAL_CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join("config.yml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of jobs executed concurrently
    pub pool_size: usize,

    /// Directory holding stack documents, one `<reference>.yml` each
    pub stack_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            stack_dir: PathBuf::from("stacks"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Upper bound for every convergence wait; each backend's own default
    /// applies when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl PollSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Credentials per backend key (`hpcloud`, `rightscale`, ...)
    pub deployer_credentials: BTreeMap<String, Credentials>,

    pub worker: WorkerConfig,

    pub poll: PollSettings,
}

impl Config {
    pub fn from_yaml(content: &str, origin: &Path) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate `path`. A relative `stack_dir` is taken relative
    /// to the file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content, path)?;
        if config.worker.stack_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.worker.stack_dir = parent.join(&config.worker.stack_dir);
            }
        }
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "worker.pool_size must be at least 1".to_string(),
            ));
        }
        if self.poll.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "poll.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn credentials_for(&self, backend: &str) -> Result<&Credentials> {
        self.deployer_credentials
            .get(backend)
            .ok_or_else(|| ConfigError::MissingCredentials(backend.to_string()))
    }
}

/// Discover and load the configuration file
pub fn load_config() -> Result<Config> {
    Config::load(&find_config_file()?)
}
