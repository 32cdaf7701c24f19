//! Configuration for clipbox-core
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! [storage]
//! root = "/Users/me/Library/Application Support/clipbox"
//! metadata_file = "clips.sqlite"
//! staging_file = "staging.sqlite"
//! reference_file = "references.sqlite"
//! images_dir = "images"
//! staging_images_dir = "staging-images"
//!
//! [migration]
//! overwrite_existing = true
//! allow_tag_creation = false
//! ```
//!
//! Every key is optional; missing keys take their defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::migration::MigrationOptions;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipboxConfig {
    pub storage: StorageConfig,
    pub migration: MigrationOptions,
}

/// Where each store keeps its data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every store below
    pub root: PathBuf,
    /// Permanent metadata database, relative to `root`
    pub metadata_file: String,
    /// Staging metadata database, relative to `root`
    pub staging_file: String,
    /// Reference tag database, relative to `root`
    pub reference_file: String,
    /// Permanent image directory, relative to `root`
    pub images_dir: String,
    /// Staging image directory, relative to `root`
    pub staging_images_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("clipbox"),
            metadata_file: "clips.sqlite".to_string(),
            staging_file: "staging.sqlite".to_string(),
            reference_file: "references.sqlite".to_string(),
            images_dir: "images".to_string(),
            staging_images_dir: "staging-images".to_string(),
        }
    }
}

impl StorageConfig {
    /// Storage rooted at `root` with default file names
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(&self.metadata_file)
    }

    pub fn staging_path(&self) -> PathBuf {
        self.root.join(&self.staging_file)
    }

    pub fn reference_path(&self) -> PathBuf {
        self.root.join(&self.reference_file)
    }

    pub fn images_path(&self) -> PathBuf {
        self.root.join(&self.images_dir)
    }

    pub fn staging_images_path(&self) -> PathBuf {
        self.root.join(&self.staging_images_dir)
    }
}

impl ClipboxConfig {
    /// Default location of the config file (`<config dir>/clipbox/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("clipbox").join("config.toml"))
    }

    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check that every store has a name and no two stores share a path
    pub fn validate(&self) -> Result<(), ConfigError> {
        let storage = &self.storage;
        let names = [
            ("metadata_file", &storage.metadata_file),
            ("staging_file", &storage.staging_file),
            ("reference_file", &storage.reference_file),
            ("images_dir", &storage.images_dir),
            ("staging_images_dir", &storage.staging_images_dir),
        ];

        let mut seen = HashSet::new();
        for (key, name) in names {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("storage.{} is empty", key)));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "storage.{} reuses {:?}",
                    key, name
                )));
            }
        }
        Ok(())
    }
}
