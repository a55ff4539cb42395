//! Persisted reporter settings.
//!
//! Usage reporting is opt-in: the `opt_in` flag defaults to off and nothing
//! is counted against the user's wishes. Settings live as JSON under
//! `~/.usage-reporter/config.json`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_period_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Whether the user agreed to anonymous usage reporting.
    #[serde(default)]
    pub opt_in: bool,
    /// Collection endpoint. Reporting cycles are skipped while unset.
    #[serde(default)]
    pub server_url: Option<String>,
    /// Seconds between reporting cycles.
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            opt_in: false,
            server_url: None,
            period_secs: default_period_secs(),
        }
    }
}

impl ReporterConfig {
    /// Loads the configuration from its home location, falling back to
    /// defaults when no file exists yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir: {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write config: {}", path.display()))
    }
}

/// Path of the persisted configuration, `~/.usage-reporter/config.json`.
pub fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".usage-reporter").join("config.json"))
}
