use super::types::{Channel, EngineState, Message, MessageMeta, Role};
use crate::utils::{new_id, now_millis};

/// Sorts by timestamp. The sort is stable, so messages sharing a
/// millisecond keep their insertion order.
pub fn sorted_by_time(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by_key(|m| m.timestamp);
    messages
}

impl EngineState {
    /// Appends a message, creating the contact on first reference. A fresh
    /// turn id is generated when `turn_id` is `None`.
    pub fn append_message(
        &mut self,
        contact_id: &str,
        channel: &Channel,
        role: Role,
        content: &str,
        turn_id: Option<String>,
    ) -> Message {
        self.ensure_contact(contact_id);
        let list = self.messages.entry(contact_id.to_string()).or_default();

        // Wall clock can step backwards; the sort key must not.
        let latest = list.iter().map(|m| m.timestamp).max().unwrap_or(0);
        let message = Message {
            id: new_id(),
            timestamp: now_millis().max(latest),
            contact_id: contact_id.to_string(),
            channel: channel.clone(),
            role,
            content: content.to_string(),
            turn_id: turn_id.unwrap_or_else(new_id),
            edited_at: None,
            meta: MessageMeta::default(),
        };
        list.push(message.clone());
        message
    }

    /// Messages of a contact sorted by timestamp, optionally limited to one
    /// channel. `None` for the contact reads the active contact.
    pub fn messages_for(&self, contact_id: Option<&str>, channel: Option<&Channel>) -> Vec<Message> {
        let Some(cid) = contact_id.or(self.active_contact_id.as_deref()) else {
            return Vec::new();
        };
        let list = self
            .messages
            .get(cid)
            .map(|list| {
                list.iter()
                    .filter(|m| channel.map_or(true, |c| &m.channel == c))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        sorted_by_time(list)
    }

    pub fn message(&self, contact_id: &str, msg_id: &str) -> Option<&Message> {
        self.messages
            .get(contact_id)
            .and_then(|list| list.iter().find(|m| m.id == msg_id))
    }

    pub(crate) fn message_mut(&mut self, contact_id: &str, msg_id: &str) -> Option<&mut Message> {
        self.messages
            .get_mut(contact_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == msg_id))
    }

    /// Replaces content in place and bumps the timestamp past every
    /// message of the contact.
    pub fn update_message(&mut self, contact_id: &str, msg_id: &str, content: &str) -> bool {
        let Some(list) = self.messages.get_mut(contact_id) else {
            return false;
        };
        let latest = list.iter().map(|m| m.timestamp).max().unwrap_or(0);
        match list.iter_mut().find(|m| m.id == msg_id) {
            Some(message) => {
                let now = now_millis();
                message.content = content.to_string();
                message.timestamp = now.max(latest);
                message.edited_at = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn delete_message(&mut self, contact_id: &str, msg_id: &str) -> bool {
        let Some(list) = self.messages.get_mut(contact_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|m| m.id != msg_id);
        list.len() != before
    }

    /// Removes every user/assistant message of `turn_id` in `channel`.
    pub fn delete_turn(&mut self, contact_id: &str, channel: &Channel, turn_id: &str) -> bool {
        self.remove_turn_messages(contact_id, channel, turn_id, &[Role::User, Role::Assistant]) > 0
    }

    pub(crate) fn remove_turn_messages(
        &mut self,
        contact_id: &str,
        channel: &Channel,
        turn_id: &str,
        roles: &[Role],
    ) -> usize {
        let Some(list) = self.messages.get_mut(contact_id) else {
            return 0;
        };
        let before = list.len();
        list.retain(|m| !(m.turn_id == turn_id && &m.channel == channel && roles.contains(&m.role)));
        before - list.len()
    }

    /// Clears a contact's history, or only one channel of it.
    pub fn clear_messages(&mut self, contact_id: &str, channel: Option<&Channel>) {
        match (self.messages.get_mut(contact_id), channel) {
            (Some(list), Some(channel)) => list.retain(|m| &m.channel != channel),
            (Some(list), None) => list.clear(),
            (None, _) => {}
        }
    }

    pub fn clear_all_messages(&mut self) {
        for list in self.messages.values_mut() {
            list.clear();
        }
    }

    pub fn turn_messages(&self, contact_id: &str, channel: &Channel, turn_id: &str) -> Vec<Message> {
        self.messages_for(Some(contact_id), Some(channel))
            .into_iter()
            .filter(|m| m.turn_id == turn_id)
            .collect()
    }

    /// Turn id of the newest assistant message in the channel.
    pub fn last_assistant_turn_id(&self, contact_id: &str, channel: &Channel) -> Option<String> {
        self.messages_for(Some(contact_id), Some(channel))
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.turn_id.clone())
    }

    /// A turn is the last one when no other turn in the channel has an
    /// assistant message after the turn's newest message.
    pub fn is_last_turn(&self, contact_id: &str, channel: &Channel, turn_id: &str) -> bool {
        let ordered = self.messages_for(Some(contact_id), Some(channel));
        let Some(turn_end) = ordered.iter().rposition(|m| m.turn_id == turn_id) else {
            return false;
        };
        !ordered[turn_end + 1..]
            .iter()
            .any(|m| m.role == Role::Assistant && m.turn_id != turn_id)
    }
}
