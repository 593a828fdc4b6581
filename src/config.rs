//! Configuration loading and management
//!
//! Handles parsing of `.arbor.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Largest batch the remote store accepts in one call.
pub const MAX_BATCH_LIMIT: usize = 500;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Remote store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Optimistic sync settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Task settings
    #[serde(default)]
    pub tasks: TasksConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Upper bound for a single remote call; a timeout counts as a failure
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Operations per batch during bulk import
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_batch_limit() -> usize {
    MAX_BATCH_LIMIT
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            batch_limit: default_batch_limit(),
        }
    }
}

/// How local state is rolled back when persistence fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevertPolicy {
    /// Republish the whole pre-mutation state. Mutations that landed while
    /// the failed write was in flight are lost.
    #[default]
    Snapshot,
    /// Restore only the entities the failed mutation touched.
    Entity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub revert: RevertPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Name given to tasks whose stored name is empty
    #[serde(default = "default_placeholder_name")]
    pub placeholder_name: String,
}

fn default_placeholder_name() -> String {
    "Untitled task".to_string()
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            placeholder_name: default_placeholder_name(),
        }
    }
}

impl Config {
    /// Load configuration from a `.arbor.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise return defaults.
    ///
    /// A file that exists but does not parse or validate is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "store.timeout_ms must be > 0".to_string(),
            ));
        }
        if !(1..=MAX_BATCH_LIMIT).contains(&self.store.batch_limit) {
            return Err(Error::InvalidConfig(format!(
                "store.batch_limit must be between 1 and {MAX_BATCH_LIMIT}"
            )));
        }
        if self.tasks.placeholder_name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "tasks.placeholder_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
