//! Tracker configuration (`<config_dir>/reftrack/config.yaml`)
//!
//! Every field has a default, so a missing file or a partial one is fine.

use crate::extract::ExtractorConfig;
use crate::refresh::{DEFAULT_COOLDOWN_MINUTES, DEFAULT_GRAPHQL_URL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub graphql_url: String,
    /// Environment variable checked before falling back to `gh auth token`
    pub token_env: String,
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            graphql_url: DEFAULT_GRAPHQL_URL.to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BugzillaConfig {
    /// Host assumed for loose "Bug NNN" mentions; empty disables them
    pub default_host: String,
    pub timeout_secs: u64,
}

impl Default for BugzillaConfig {
    fn default() -> Self {
        Self {
            default_host: ExtractorConfig::default().default_bugzilla_host,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// `None` means [`default_db_path`]
    pub db_path: Option<PathBuf>,
    pub cooldown_minutes: i64,
    pub github: GitHubConfig,
    pub bugzilla: BugzillaConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            github: GitHubConfig::default(),
            bugzilla: BugzillaConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Load from the default location
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&default_config_path())
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            default_bugzilla_host: self.bugzilla.default_host.clone(),
        }
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_minutes.max(0))
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(default_db_path)
    }

    pub fn graphql_timeout(&self) -> Duration {
        Duration::from_secs(self.github.timeout_secs)
    }

    pub fn bugzilla_timeout(&self) -> Duration {
        Duration::from_secs(self.bugzilla.timeout_secs)
    }
}

/// `~/.config/reftrack/config.yaml` on Linux
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".config"))
        .join("reftrack")
        .join("config.yaml")
}

/// `~/.local/share/reftrack/reftrack.db` on Linux
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"))
        .join("reftrack")
        .join("reftrack.db")
}
