use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::orchestration::{ExecutorConfig, FailurePolicy, DEFAULT_API_KEY_ENV, DEFAULT_ENDPOINT};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_workers: usize,
    pub failure_policy: FailurePolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,
    pub provider: ProviderConfig,
    pub search: SearchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: 4,
            failure_policy: FailurePolicy::default(),
            task_timeout_secs: None,
            run_timeout_secs: None,
            provider: ProviderConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

/// The `claude` CLI used for planning, solving and synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub command: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            timeout_secs: 600,
        }
    }
}

impl ProviderConfig {
    pub fn effective_command(&self) -> PathBuf {
        expand_tilde(&self.command)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    /// Name of the env var holding the Serper API key.
    pub api_key_env: String,
    pub endpoint: String,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_results: 5,
        }
    }
}

impl Config {
    pub fn planex_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".planex"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::planex_dir()?.join("planex.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            max_workers = config.max_workers,
            failure_policy = %config.failure_policy,
            command = %config.provider.command,
            search = config.search.enabled,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                debug!(dir = %dir.display(), "creating config directory");
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, self.to_toml()?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Validation("max_workers must be at least 1".to_string()));
        }
        if self.provider.timeout_secs == 0 {
            return Err(Error::Validation(
                "provider.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.search.enabled && self.search.max_results == 0 {
            return Err(Error::Validation(
                "search.max_results must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The settings injected into the executor.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_workers: self.max_workers,
            failure_policy: self.failure_policy,
            task_timeout: self.task_timeout_secs.map(Duration::from_secs),
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
