use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{read_json_or_default, write_json, KeyValueStore, PROMPT_CONFIG_KEY};
use crate::chat_manager::types::Contact;
use crate::error::AppResult;

/// Preset scope used when a scope has no array of its own.
pub const GLOBAL_SCOPE: &str = "global";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Entries without the flag are treated as disabled.
    #[serde(default)]
    pub enabled: bool,
}

impl PromptEntry {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: crate::utils::new_id(),
            title: String::new(),
            content: content.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Enabled and carrying non-blank content.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.content.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldBook {
    pub global: Vec<PromptEntry>,
    /// Entries keyed by contact id.
    pub contact: HashMap<String, Vec<PromptEntry>>,
}

/// World-book and preset document. Edited by the world-book and preset
/// editors; the engine only reads it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptConfig {
    pub version: u32,
    pub active_contact_id: Option<String>,
    pub contacts: Vec<Contact>,
    pub worldbook: WorldBook,
    /// Preset arrays keyed by scope.
    pub presets: HashMap<String, Vec<PromptEntry>>,
}

impl PromptConfig {
    pub fn contact_entries(&self, contact_id: &str) -> &[PromptEntry] {
        self.worldbook
            .contact
            .get(contact_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Presets for `scope`, falling back to the global array when the
    /// scope has none.
    pub fn scope_presets(&self, scope: &str) -> &[PromptEntry] {
        self.presets
            .get(scope)
            .or_else(|| self.presets.get(GLOBAL_SCOPE))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

pub fn load_prompt_config(store: &dyn KeyValueStore) -> PromptConfig {
    read_json_or_default(store, PROMPT_CONFIG_KEY)
}

pub fn save_prompt_config(store: &dyn KeyValueStore, config: &PromptConfig, origin: &str) -> AppResult<()> {
    write_json(store, PROMPT_CONFIG_KEY, config, origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_falls_back_to_global() {
        let raw = r#"{
            "version": 1,
            "presets": {
                "global": [{"id":"g","title":"","content":"global rule","enabled":true}],
                "sms": [{"id":"s","content":"sms rule"}]
            }
        }"#;
        let config: PromptConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.scope_presets("sms")[0].content, "sms rule");
        assert!(!config.scope_presets("sms")[0].is_active());
        assert!(config.scope_presets("global")[0].is_active());
        assert_eq!(config.scope_presets("main")[0].content, "global rule");
        assert!(config.contact_entries("ybm").is_empty());
    }

    #[test]
    fn blank_entries_are_inactive() {
        assert!(!PromptEntry::new("   ").is_active());
        assert!(!PromptEntry::new("x").disabled().is_active());
        assert!(PromptEntry::new("x").is_active());
    }
}
