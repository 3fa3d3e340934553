use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::RepackError;

/// On-disk config file shape. Every section is optional; the file itself is
/// optional unless a path is given explicitly.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub metadata: MetadataSection,
    #[serde(default)]
    pub processing: ProcessingSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PathsSection {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub temp: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MetadataSection {
    #[serde(default = "default_metadata_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MetadataSection {
    fn default() -> Self {
        Self {
            enabled: default_metadata_enabled(),
            rate_limit_ms: default_rate_limit_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProcessingSection {
    #[serde(default = "default_save_interval")]
    pub save_interval: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ProcessingSection {
    fn default() -> Self {
        Self {
            save_interval: default_save_interval(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_metadata_enabled() -> bool {
    true
}

fn default_rate_limit_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_save_interval() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the config file. An explicit path must exist; the default
    /// `manga-repack.json` is used only when present, falling back to
    /// built-in defaults otherwise.
    pub fn resolve(path: Option<&str>) -> Result<Config, RepackError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("manga-repack.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| RepackError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| RepackError::ConfigParse(err.to_string()))
    }
}
