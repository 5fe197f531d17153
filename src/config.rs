//! Configuration management with YAML support

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::source::Source;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Per-source overrides, keyed by source tag
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
}

/// Individual source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub base_path: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./annal.yaml (current directory)
    /// 3. ~/.config/annal/annal.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "annal.yaml".to_string(),
            shellexpand::tilde("~/.config/annal/annal.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Check if a source is enabled (default: enabled)
    pub fn is_source_enabled(&self, source: Source) -> bool {
        self.sources
            .get(source.tag())
            .map_or(true, |s| s.enabled)
    }

    /// Get the base path override for a source, if configured
    pub fn source_path(&self, source: Source) -> Option<PathBuf> {
        self.sources
            .get(source.tag())
            .and_then(|s| s.base_path.as_ref())
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }
}
