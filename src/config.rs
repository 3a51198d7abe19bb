use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::chat_manager::types::Channel;
use crate::error::AppResult;
use crate::utils::default_data_dir;

pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 24_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_SUMMARY_EVERY: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    pub level: String,
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// Format rules for restrictive channels. A reply passes when it uses at
/// least one recognised line prefix, carries no Markdown structure and
/// keeps Latin letters under `max_latin_ratio` of its visible chars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ComplianceRules {
    pub line_prefixes: Vec<String>,
    pub max_latin_ratio: f64,
}

impl Default for ComplianceRules {
    fn default() -> Self {
        Self {
            line_prefixes: vec![
                "[SMS]".to_string(),
                "[VOICE]".to_string(),
                "[PHOTO]".to_string(),
                "[STICKER]".to_string(),
            ],
            max_latin_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelRules {
    /// Hard length limit in chars; longer replies are cut and suffixed.
    pub max_chars: Option<usize>,
    pub compliance: Option<ComplianceRules>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub storage_dir: PathBuf,
    /// Character budget for the prompt. An approximation of a token budget.
    pub max_context_chars: usize,
    pub request_timeout_ms: u64,
    pub temperature: f64,
    pub summary_every: u32,
    pub channels: HashMap<String, ChannelRules>,
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut channels = HashMap::new();
        channels.insert(
            Channel::MAIN.to_string(),
            ChannelRules {
                max_chars: Some(6000),
                compliance: None,
            },
        );
        channels.insert(
            Channel::PHONE.to_string(),
            ChannelRules {
                max_chars: Some(1500),
                compliance: None,
            },
        );
        channels.insert(
            Channel::SMS.to_string(),
            ChannelRules {
                max_chars: Some(600),
                compliance: Some(ComplianceRules::default()),
            },
        );

        Self {
            storage_dir: default_data_dir(),
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            temperature: DEFAULT_TEMPERATURE,
            summary_every: DEFAULT_SUMMARY_EVERY,
            channels,
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Rules for a channel; unknown channels get no cap and no compliance.
    pub fn channel_rules(&self, channel: &Channel) -> ChannelRules {
        self.channels
            .get(channel.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"maxContextChars": 500, "log": {"level": "debug"}}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.max_context_chars, 500);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert!(config.channel_rules(&Channel::sms()).compliance.is_some());
    }

    #[test]
    fn unknown_channel_has_no_rules() {
        let config = EngineConfig::default();
        let rules = config.channel_rules(&Channel::new("diary"));
        assert_eq!(rules, ChannelRules::default());
    }
}
