use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

pub const ENGINE_STATE_VERSION: u32 = 1;

/// Display surface a message belongs to. Channels partition rendering only;
/// every channel of a contact feeds the same conversational memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(pub String);

impl Channel {
    pub const MAIN: &'static str = "main";
    pub const PHONE: &'static str = "phone";
    pub const SMS: &'static str = "sms";

    pub fn new(name: impl Into<String>) -> Self {
        Channel(name.into())
    }

    pub fn main() -> Self {
        Channel::new(Self::MAIN)
    }

    pub fn phone() -> Self {
        Channel::new(Self::PHONE)
    }

    pub fn sms() -> Self {
        Channel::new(Self::SMS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Channel {
    fn default() -> Self {
        Channel::main()
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl Contact {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar_ref: None,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    /// Content is an `(error) ...` record rather than a model reply.
    #[serde(default, skip_serializing_if = "is_false")]
    pub error: bool,
    /// Assistant placeholder written before the completion call returns.
    #[serde(default, skip_serializing_if = "is_false")]
    pub pending: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub repaired: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(alias = "ts")]
    pub timestamp: u64,
    #[serde(default)]
    pub contact_id: String,
    #[serde(default)]
    pub channel: Channel,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub turn_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<u64>,
    #[serde(default)]
    pub meta: MessageMeta,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiSettings {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
}

/// Root persisted document. Owned by one `ChatEngine`; collaborators only
/// reach it through engine operations.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    #[serde(default = "default_state_version")]
    pub version: u32,
    #[serde(default)]
    pub active_contact_id: Option<String>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub messages: HashMap<String, Vec<Message>>,
    #[serde(default)]
    pub api: ApiSettings,
}

fn default_state_version() -> u32 {
    ENGINE_STATE_VERSION
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            version: ENGINE_STATE_VERSION,
            active_contact_id: None,
            contacts: Vec::new(),
            messages: HashMap::new(),
            api: ApiSettings::default(),
        }
    }
}

/// Role/content pair as sent to the completions endpoint.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub channel: Option<Channel>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SendArgs {
    pub text: String,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub contact_id: Option<String>,
    /// Preset scope for the system prompt; defaults to the channel name.
    #[serde(default)]
    pub system_scope: Option<String>,
    #[serde(default)]
    pub turn_id: Option<String>,
}

impl SendArgs {
    pub fn new(text: impl Into<String>, channel: Channel) -> Self {
        Self {
            text: text.into(),
            channel,
            contact_id: None,
            system_scope: None,
            turn_id: None,
        }
    }

    pub fn to_contact(mut self, contact_id: impl Into<String>) -> Self {
        self.contact_id = Some(contact_id.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.system_scope = Some(scope.into());
        self
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RerollArgs {
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub system_scope: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTurnArgs {
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub channel: Channel,
    pub turn_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_messages_deserialize() {
        let raw = r#"{"id":"m1","ts":42,"role":"assistant","content":"hi","channel":"phone"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.timestamp, 42);
        assert_eq!(msg.channel, Channel::phone());
        assert!(msg.turn_id.is_empty());
        assert_eq!(msg.meta, MessageMeta::default());
    }

    #[test]
    fn meta_flags_are_omitted_when_unset() {
        let value = serde_json::to_value(MessageMeta::default()).unwrap();
        assert_eq!(value, serde_json::json!({}));

        let value = serde_json::to_value(MessageMeta {
            error: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({ "error": true }));
    }
}
