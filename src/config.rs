//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::epg::{GuideParser, MergeMode, NaiveTimePolicy};
use crate::error::ConfigError;

/// One guide document to merge, identified by a label used in logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideSource {
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuideConfig {
    /// How timestamps without a zone suffix are read
    #[serde(default)]
    pub naive_time: NaiveTimePolicy,
    #[serde(default)]
    pub playlist: Option<PathBuf>,
    /// Merged in order
    #[serde(default)]
    pub guides: Vec<GuideSource>,
    /// Loaded after `guides` and replaces whatever they produced. If it
    /// fails to parse, the accumulated guide is kept.
    #[serde(default)]
    pub replace: Option<GuideSource>,
}

impl GuideConfig {
    pub fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("iptv_guide");
        path.push("config.json");
        path
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load from the user config directory, falling back to defaults
    pub fn load_or_default() -> Self {
        let path = Self::config_path();

        if path.exists() {
            match Self::load(&path) {
                Ok(config) => return config,
                Err(e) => warn!("{}; using defaults", e),
            }
        }

        Self::default()
    }

    pub fn guide_parser(&self) -> GuideParser {
        GuideParser::with_policy(self.naive_time)
    }

    /// Guide sources in merge order, each with the mode it is merged in
    pub fn merge_plan(&self) -> Vec<(&GuideSource, MergeMode)> {
        self.guides
            .iter()
            .map(|source| (source, MergeMode::Accumulate))
            .chain(self.replace.iter().map(|source| (source, MergeMode::Replace)))
            .collect()
    }
}
