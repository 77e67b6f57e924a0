use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Could not determine a config directory")]
    NoConfigDir,
}

/// Platform directories for hearth (config, data, logs)
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "hearth")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Simulation tick period in milliseconds (default: 50ms = 20Hz)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Work items applied per tick; 0 drains everything queued at tick start
    #[serde(default)]
    pub max_work_items_per_tick: usize,
}

fn default_tick_interval_ms() -> u64 {
    50
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_work_items_per_tick: 0,
        }
    }
}

impl RunnerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to <data_dir>/logs/<component>.log
    #[serde(default)]
    pub file: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Names of built-in scripts to load
    #[serde(default = "default_enabled_scripts")]
    pub enabled: Vec<String>,
}

fn default_enabled_scripts() -> Vec<String> {
    vec![
        "spell_echo".to_string(),
        "cast_gate".to_string(),
        "quest_courier".to_string(),
    ]
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_scripts(),
        }
    }
}

impl ScriptsConfig {
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.iter().any(|enabled| enabled == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HearthConfig {
    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scripts: ScriptsConfig,
}

impl HearthConfig {
    /// Default config location: <config_dir>/config.toml
    pub fn config_path() -> Result<PathBuf, ConfigLoadError> {
        project_dirs()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigLoadError::NoConfigDir)
    }

    /// Load from the default location
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        info!(target: "runner", "Loaded config from {}", path.display());
        Ok(config)
    }
}
