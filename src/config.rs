//! Planner configuration, loaded from JSON.

use crate::cache::CACHE_FORMAT_VERSION;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Prefix of every cache key. Entries with another prefix are ignored.
    pub cache_format_version: String,
    pub enable_cache: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            cache_format_version: CACHE_FORMAT_VERSION.to_string(),
            enable_cache: true,
        }
    }
}

impl PlannerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn without_cache(mut self) -> Self {
        self.enable_cache = false;
        self
    }
}
