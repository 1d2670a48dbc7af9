//! Persistent unit daemon configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use outpost_core::models::DatasetSchema;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "unit-config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Shared bearer token peers must present; unauthenticated when unset
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Datasets this unit synchronizes, provisioned at startup
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetSchema>,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            db_path: default_db_path(),
            bind_addr: default_bind_addr(),
            auth_token: None,
            datasets: BTreeMap::new(),
        }
    }
}

const fn default_config_version() -> u32 {
    1
}

fn default_db_path() -> PathBuf {
    PathBuf::from("outpost-unit.db")
}

fn default_bind_addr() -> String {
    "127.0.0.1:8071".to_string()
}

impl UnitConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    fn normalize(&mut self) {
        self.auth_token = self
            .auth_token
            .take()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
    }
}
