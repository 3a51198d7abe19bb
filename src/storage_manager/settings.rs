use serde::{Deserialize, Serialize};

use super::{read_json_or_default, write_json, KeyValueStore, API_CONFIG_KEY};
use crate::error::AppResult;
use crate::providers::AuthStyle;

/// API credentials document, edited by the settings panel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiConfig {
    pub version: u32,
    pub provider: Option<String>,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f64>,
    /// Overrides the host-based auth header choice.
    pub auth_style: Option<AuthStyle>,
}

impl ApiConfig {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            version: 1,
            base_url: base_url.trim().to_string(),
            api_key: api_key.trim().to_string(),
            model: model.trim().to_string(),
            ..Default::default()
        }
    }

    /// Base URL and model are present. The key may be empty for endpoints
    /// without auth.
    pub fn is_ready(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.model.trim().is_empty()
    }
}

pub fn load_api_config(store: &dyn KeyValueStore) -> ApiConfig {
    read_json_or_default(store, API_CONFIG_KEY)
}

pub fn save_api_config(store: &dyn KeyValueStore, config: &ApiConfig, origin: &str) -> AppResult<()> {
    let mut config = config.clone();
    config.version = config.version.max(1);
    config.base_url = config.base_url.trim().to_string();
    config.api_key = config.api_key.trim().to_string();
    config.model = config.model.trim().to_string();
    write_json(store, API_CONFIG_KEY, &config, origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_manager::MemoryStore;

    #[test]
    fn saved_config_is_trimmed() {
        let store = MemoryStore::new();
        let mut config = ApiConfig::new("https://api.x.com", "sk", "m");
        config.api_key = "  sk-1  ".into();
        save_api_config(&store, &config, "settings").unwrap();

        let loaded = load_api_config(&store);
        assert_eq!(loaded.api_key, "sk-1");
        assert!(loaded.is_ready());
    }

    #[test]
    fn missing_document_is_not_ready() {
        let store = MemoryStore::new();
        assert!(!load_api_config(&store).is_ready());
    }

    #[test]
    fn key_is_optional() {
        assert!(ApiConfig::new("http://127.0.0.1:8080", "", "local").is_ready());
        assert!(!ApiConfig::new("http://127.0.0.1:8080", "sk", " ").is_ready());
    }
}
