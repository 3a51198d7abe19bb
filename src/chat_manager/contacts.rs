use super::types::{Contact, EngineState};

/// Starter roster registered when nothing else provides one.
pub fn default_contacts() -> Vec<Contact> {
    vec![
        Contact::new("ybm", "岩白眉"),
        Contact::new("caishu", "猜叔"),
        Contact::new("dantuo", "但拓"),
        Contact::new("zhoubin", "州槟"),
    ]
}

impl EngineState {
    pub fn list_contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn contact(&self, id: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id == id)
    }

    pub fn active_contact_id(&self) -> Option<&str> {
        self.active_contact_id.as_deref()
    }

    /// Registers `id` with its id as display name if unknown. Returns true
    /// when the contact was created.
    pub fn ensure_contact(&mut self, id: &str) -> bool {
        self.messages.entry(id.to_string()).or_default();
        if self.contact(id).is_some() {
            return false;
        }
        self.contacts.push(Contact::new(id, id));
        true
    }

    /// Explicit registration. An existing id keeps its position and gets
    /// the new name and avatar.
    pub fn add_contact(&mut self, contact: Contact) -> bool {
        self.messages.entry(contact.id.clone()).or_default();
        if let Some(existing) = self.contacts.iter_mut().find(|c| c.id == contact.id) {
            existing.name = contact.name;
            if contact.avatar_ref.is_some() {
                existing.avatar_ref = contact.avatar_ref;
            }
            return false;
        }
        self.contacts.push(contact);
        true
    }

    /// Merges a roster, then activates its first entry when nothing is
    /// active. Returns how many contacts were new.
    pub fn merge_contacts(&mut self, roster: &[Contact]) -> usize {
        let added = roster
            .iter()
            .filter(|contact| self.add_contact((*contact).clone()))
            .count();
        if self.active_contact_id.is_none() {
            if let Some(first) = roster.first() {
                self.active_contact_id = Some(first.id.clone());
            }
        }
        added
    }

    pub fn set_active_contact(&mut self, id: &str) -> bool {
        if id.trim().is_empty() {
            return false;
        }
        self.ensure_contact(id);
        self.active_contact_id = Some(id.to_string());
        true
    }

    /// Repairs documents written by older builds: message lists keyed by
    /// unknown contacts get a contact entry, messages without contact or
    /// turn ids inherit the list key and their own id.
    pub fn normalize(&mut self) {
        let keys: Vec<String> = self.messages.keys().cloned().collect();
        for key in keys {
            if self.contact(&key).is_none() {
                self.contacts.push(Contact::new(key.as_str(), key.as_str()));
            }
            if let Some(list) = self.messages.get_mut(&key) {
                for msg in list.iter_mut() {
                    if msg.contact_id.is_empty() {
                        msg.contact_id = key.clone();
                    }
                    if msg.turn_id.is_empty() {
                        msg.turn_id = msg.id.clone();
                    }
                }
            }
        }
        if let Some(active) = self.active_contact_id.clone() {
            self.messages.entry(active).or_default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_contact_updates_existing_without_reordering() {
        let mut state = EngineState::default();
        assert!(state.add_contact(Contact::new("ybm", "岩白眉")));
        assert!(state.add_contact(Contact::new("dantuo", "但拓")));
        assert!(!state.add_contact(Contact::new("ybm", "Yan")));

        let ids: Vec<&str> = state.list_contacts().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["ybm", "dantuo"]);
        assert_eq!(state.contact("ybm").unwrap().name, "Yan");
    }

    #[test]
    fn merge_activates_first_when_idle() {
        let mut state = EngineState::default();
        let roster = vec![Contact::new("a", "A"), Contact::new("b", "B")];
        assert_eq!(state.merge_contacts(&roster), 2);
        assert_eq!(state.active_contact_id(), Some("a"));

        state.set_active_contact("b");
        assert_eq!(state.merge_contacts(&roster), 0);
        assert_eq!(state.active_contact_id(), Some("b"));
    }

    #[test]
    fn set_active_lazily_creates() {
        let mut state = EngineState::default();
        assert!(!state.set_active_contact("  "));
        assert!(state.set_active_contact("zhoubin"));
        assert!(state.contact("zhoubin").is_some());
        assert!(state.messages.contains_key("zhoubin"));
    }

    #[test]
    fn normalize_fills_legacy_ids() {
        let raw = r#"{
            "activeContactId": "ybm",
            "messages": { "ybm": [ {"id":"m1","ts":1,"role":"user","content":"hi"} ] }
        }"#;
        let mut state: EngineState = serde_json::from_str(raw).unwrap();
        state.normalize();

        let msg = &state.messages["ybm"][0];
        assert_eq!(msg.contact_id, "ybm");
        assert_eq!(msg.turn_id, "m1");
        assert!(state.contact("ybm").is_some());
    }
}
