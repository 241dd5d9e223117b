use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error_handler::QuillError;

// ---------------------------------------------------------------------------
// QuillConfig
// ---------------------------------------------------------------------------

/// Application configuration stored at `~/.quill/config.json`.
///
/// Every field has a default, so older or partial config files keep loading.
/// Command-line flags override these values for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    // Logging
    pub log_level: String,

    // Data preview
    pub preview_rows: usize,

    // Replacement
    /// `"full"` or `"brackets"`.
    pub replace_scope: String,
    pub include_headers_footers: bool,

    // Output naming
    pub fallback_stem: String,
    pub default_prefix: String,
    pub default_suffix: String,

    // Output packaging
    pub write_report: bool,
}

impl Default for QuillConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            preview_rows: 30,
            replace_scope: "full".into(),
            include_headers_footers: true,
            fallback_stem: "result".into(),
            default_prefix: String::new(),
            default_suffix: String::new(),
            write_report: false,
        }
    }
}

impl QuillConfig {
    /// Returns the base config directory: `~/.quill/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".quill"))
    }

    /// Returns the config file path: `~/.quill/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.quill/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Ensures all required directories exist.
    pub fn ensure_dirs() -> Result<()> {
        let dirs = [Self::base_dir()?, Self::logs_dir()?];
        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Loads config from disk, or creates default if missing.
    pub fn load() -> Result<Self> {
        Self::ensure_dirs()?;
        let path = Self::config_path()?;
        Self::load_from_path(&path)
    }

    /// Load config from a specific file path, writing defaults there if the
    /// file does not exist yet.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self = serde_json::from_str(&content).map_err(|e| {
                QuillError::Config(format!("{}: {e}", path.display()))
            })?;
            config.validate()?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
            config.save_to_path(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Save config to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !matches!(self.replace_scope.as_str(), "full" | "brackets") {
            return Err(QuillError::Config(format!(
                "replace_scope must be \"full\" or \"brackets\", got \"{}\"",
                self.replace_scope
            ))
            .into());
        }
        if self.fallback_stem.trim().is_empty() {
            return Err(QuillError::Config("fallback_stem must not be empty".into()).into());
        }
        Ok(())
    }
}
