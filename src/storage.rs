//! On-disk layout of an arbor data home.
//!
//! # Directory Structure
//!
//! ```text
//! <home>/
//!   .arbor.toml                 # Configuration
//!   store/                      # File-backed remote store
//!     .lock                     # Store-wide write lock
//!     projects/<id>.json        # One document per project
//!     groups/<id>.json          # One document per group
//! ```
//!
//! The home is `--home` / `ARBOR_HOME` when given, otherwise the platform
//! data directory.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::lock;
use crate::state::EntityKind;

/// Name of the configuration file inside the home
pub const CONFIG_FILE: &str = ".arbor.toml";

/// Name of the store directory inside the home
pub const STORE_DIR: &str = "store";

const STORE_LOCK: &str = ".lock";

/// Path helper for one data home
#[derive(Debug, Clone)]
pub struct Storage {
    home: PathBuf,
}

impl Storage {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolve the data home from an explicit path or the platform default.
    pub fn discover(explicit: Option<PathBuf>) -> Result<Self> {
        if let Some(home) = explicit {
            return Ok(Self::new(home));
        }
        let dirs = ProjectDirs::from("dev", "arbor", "arbor").ok_or_else(|| {
            Error::InvalidConfig("cannot determine a data directory; pass --home".to_string())
        })?;
        Ok(Self::new(dirs.data_dir()))
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join(CONFIG_FILE)
    }

    pub fn store_dir(&self) -> PathBuf {
        self.home.join(STORE_DIR)
    }

    /// Directory holding one collection's documents
    pub fn collection_dir(&self, kind: EntityKind) -> PathBuf {
        self.store_dir().join(kind.collection())
    }

    pub fn store_lock_file(&self) -> PathBuf {
        self.store_dir().join(STORE_LOCK)
    }

    /// Path of one document; rejects ids that are not safe file names.
    pub fn document_file(&self, kind: EntityKind, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            return Err(Error::InvalidArgument(format!(
                "'{id}' is not a valid document id"
            )));
        }
        Ok(self.collection_dir(kind).join(format!("{id}.json")))
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.collection_dir(EntityKind::Project))?;
        fs::create_dir_all(self.collection_dir(EntityKind::Group))?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.store_dir().exists()
    }

    // =========================================================================
    // File I/O helpers
    // =========================================================================

    pub fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        lock::write_atomic(path, json.as_bytes())
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        let data: T = serde_json::from_str(&content)?;
        Ok(data)
    }
}
