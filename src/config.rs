use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::Result;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::enhance::EnhancementSettings;
use crate::providers::{ProviderConfig, builtin_providers};

/// Provider used when neither the config nor the command line names one
pub const FALLBACK_PROVIDER: &str = "openai";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub default_provider: Option<String>,
    /// Key for the structured metadata API
    pub youtube_api_key: Option<String>,
    pub request_timeout_secs: Option<u64>,
    /// Overrides the fallback tier's language order
    pub language_hints: Option<Vec<String>>,
    pub enhancement: EnhancementSettings,
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Load config from ~/.config/ytenhance/config.toml if it exists
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!("Loading config from {}", path.display());
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            debug!("No config file found at {}", path.display());
            Ok(Config::default())
        }
    }

    pub fn youtube_api_key(&self) -> Option<String> {
        self.youtube_api_key
            .clone()
            .or_else(|| std::env::var("YOUTUBE_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn default_provider(&self) -> &str {
        self.default_provider.as_deref().unwrap_or(FALLBACK_PROVIDER)
    }

    /// Built-in presets overlaid with the configured entries
    pub fn provider_configs(&self) -> Vec<ProviderConfig> {
        merge_providers(builtin_providers(), &self.providers)
    }
}

/// Configured entries replace presets of the same name, keeping the preset's key when they
/// carry none. New names are appended in order.
pub fn merge_providers(presets: Vec<ProviderConfig>, configured: &[ProviderConfig]) -> Vec<ProviderConfig> {
    let mut merged = presets;
    for entry in configured {
        match merged.iter_mut().find(|p| p.name == entry.name) {
            Some(existing) => {
                let key = existing.api_key.take();
                *existing = entry.clone();
                if existing.api_key.is_none() {
                    existing.api_key = key;
                }
            }
            None => merged.push(entry.clone()),
        }
    }
    merged
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("ytenhance")
        .join("config.toml")
}
