use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use super::{LlmProvider, ProviderConfig, ValidationResult, create_provider, validate_config};
use crate::error::{AppError, Result};

/// Named provider configurations.
///
/// Each config is held as an immutable snapshot; `update` swaps in a new one, so providers
/// already handed out keep the config they were built with.
pub struct ProviderManager {
    client: reqwest::Client,
    configs: BTreeMap<String, Arc<ProviderConfig>>,
}

impl ProviderManager {
    pub fn new(client: reqwest::Client, configs: impl IntoIterator<Item = ProviderConfig>) -> Self {
        let configs = configs
            .into_iter()
            .map(|c| (c.name.clone(), Arc::new(c)))
            .collect();
        Self { client, configs }
    }

    pub fn names(&self) -> Vec<&str> {
        self.configs.keys().map(String::as_str).collect()
    }

    /// Current snapshot for `name`
    pub fn config(&self, name: &str) -> Option<Arc<ProviderConfig>> {
        self.configs.get(name).cloned()
    }

    /// Replace the whole config for `config.name`, returning the previous snapshot
    pub fn update(&mut self, config: ProviderConfig) -> Option<Arc<ProviderConfig>> {
        debug!("Replacing provider config: {}", config.name);
        self.configs.insert(config.name.clone(), Arc::new(config))
    }

    pub fn validate_all(&self) -> Vec<(String, ValidationResult)> {
        self.configs
            .iter()
            .map(|(name, config)| (name.clone(), validate_config(config)))
            .collect()
    }

    /// Build a provider bound to the current snapshot of `name`
    pub fn provider(&self, name: &str) -> Result<Box<dyn LlmProvider>> {
        let config = self.config(name).ok_or_else(|| {
            AppError::config(
                "select_provider",
                format!("Unknown provider '{name}'. Configured: {}", self.names().join(", ")),
            )
        })?;
        Ok(create_provider(config, self.client.clone()))
    }
}
