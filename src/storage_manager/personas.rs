use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{read_json, read_json_or_default, write_json, KeyValueStore, PERSONA_KEY, USER_PROFILE_KEY};
use crate::error::AppResult;

pub const DEFAULT_USER_NAME: &str = "user";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Persona {
    pub version: u32,
    pub enabled: bool,
    pub name: String,
    pub bio: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            version: 1,
            enabled: false,
            name: String::new(),
            bio: String::new(),
        }
    }
}

impl Persona {
    pub fn new(name: impl Into<String>, bio: impl Into<String>) -> Self {
        Self {
            version: 1,
            enabled: true,
            name: name.into(),
            bio: bio.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.enabled && (!self.name.trim().is_empty() || !self.bio.trim().is_empty())
    }
}

pub fn load_persona(store: &dyn KeyValueStore) -> Persona {
    read_json_or_default(store, PERSONA_KEY)
}

pub fn save_persona(store: &dyn KeyValueStore, persona: &Persona, origin: &str) -> AppResult<()> {
    write_json(store, PERSONA_KEY, persona, origin)
}

/// Name shown on the user's bubbles: the first non-blank name-like field of
/// the profile document, then the persona document, else `"user"`.
pub fn user_display_name(store: &dyn KeyValueStore) -> String {
    const NAME_FIELDS: [&str; 4] = ["name", "username", "userName", "displayName"];

    for key in [USER_PROFILE_KEY, PERSONA_KEY] {
        let Ok(Some(doc)) = read_json::<Value>(store, key) else {
            continue;
        };
        let found = NAME_FIELDS
            .iter()
            .filter_map(|field| doc.get(*field).and_then(|v| v.as_str()))
            .map(str::trim)
            .find(|name| !name.is_empty());
        if let Some(name) = found {
            return name.to_string();
        }
    }
    DEFAULT_USER_NAME.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_manager::MemoryStore;

    #[test]
    fn display_name_probes_documents_in_order() {
        let store = MemoryStore::new();
        assert_eq!(user_display_name(&store), "user");

        save_persona(&store, &Persona::new("Lin", "a traveller"), "t").unwrap();
        assert_eq!(user_display_name(&store), "Lin");

        store
            .save(USER_PROFILE_KEY, r#"{"name":"  ","displayName":"小林"}"#, "t")
            .unwrap();
        assert_eq!(user_display_name(&store), "小林");
    }

    #[test]
    fn persona_requires_enabled_content() {
        assert!(!Persona::default().is_configured());
        assert!(Persona::new("Lin", "").is_configured());
        let mut persona = Persona::new("Lin", "bio");
        persona.enabled = false;
        assert!(!persona.is_configured());
    }
}
