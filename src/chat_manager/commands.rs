use super::client::ensure_ready;
use super::context;
use super::engine::ChatEngine;
use super::notifier::{ChangeEvent, ChangeKind};
use super::postprocess::finish_reply;
use super::prompt_engine;
use super::types::{Channel, ChatMessage, DeleteTurnArgs, EngineState, Message, RerollArgs, Role, SendArgs};
use crate::error::{AppError, AppResult};
use crate::storage_manager::lorebook::load_prompt_config;
use crate::storage_manager::personas::load_persona;
use crate::storage_manager::settings::ApiConfig;
use crate::utils::new_id;

impl ChatEngine {
    /// Sends `text` as a new turn and waits for the reply.
    ///
    /// Configuration problems are returned as errors before anything is
    /// written. Everything after that resolves to an assistant message;
    /// failures are recorded as `(error) ...` content with `meta.error`.
    pub async fn send(&self, args: SendArgs) -> AppResult<Message> {
        let SendArgs {
            text,
            channel,
            contact_id,
            system_scope,
            turn_id,
        } = args;

        if text.trim().is_empty() {
            return Err(AppError::config("message text is empty"));
        }
        let api = self.api_config();
        ensure_ready(&api)?;
        let contact_id = self.resolve_contact(contact_id.as_deref())?;
        let turn_id = turn_id.unwrap_or_else(new_id);
        let scope = system_scope.unwrap_or_else(|| channel.to_string());

        let (user, placeholder, history) = self.mutate(Some(&contact_id), |state| {
            let user = state.append_message(&contact_id, &channel, Role::User, &text, Some(turn_id.clone()));
            let placeholder = insert_placeholder(state, &contact_id, &channel, &turn_id);
            let history = state.messages_for(Some(&contact_id), None);
            (user, placeholder, history)
        });
        tracing::info!(
            contact = %contact_id,
            channel = %channel,
            turn = %turn_id,
            user_message = %user.id,
            "send started"
        );

        let messages = self.prompt_for(&contact_id, &scope, &history);
        Ok(self.complete_turn(&api, &contact_id, &channel, placeholder, &messages).await)
    }

    /// Regenerates the assistant reply of the channel's last turn. The
    /// user message is kept and the new reply reuses the turn id.
    ///
    /// Returns `None` when the channel has no answered turn or the turn's
    /// user message is missing or empty.
    pub async fn reroll_last_turn(&self, args: RerollArgs) -> AppResult<Option<Message>> {
        let RerollArgs {
            contact_id,
            channel,
            system_scope,
        } = args;

        let contact_id = self.resolve_contact(contact_id.as_deref())?;
        let Some(turn_id) = self.get_last_assistant_turn_id(&contact_id, &channel) else {
            tracing::debug!(contact = %contact_id, channel = %channel, "nothing to reroll");
            return Ok(None);
        };
        let user = self.read(|state| {
            state
                .turn_messages(&contact_id, &channel, &turn_id)
                .into_iter()
                .find(|m| m.role == Role::User)
        });
        let Some(user) = user.filter(|m| !m.content.trim().is_empty()) else {
            tracing::debug!(turn = %turn_id, "last turn has no user message, not rerolling");
            return Ok(None);
        };

        let api = self.api_config();
        ensure_ready(&api)?;
        let scope = system_scope.unwrap_or_else(|| channel.to_string());

        let (placeholder, history) = self.mutate(Some(&contact_id), |state| {
            let removed = state.remove_turn_messages(&contact_id, &channel, &turn_id, &[Role::Assistant]);
            tracing::debug!(removed, turn = %turn_id, "assistant reply removed for reroll");
            let placeholder = insert_placeholder(state, &contact_id, &channel, &turn_id);
            let ordered = state.messages_for(Some(&contact_id), None);
            let end = ordered
                .iter()
                .position(|m| m.id == user.id)
                .map(|idx| idx + 1)
                .unwrap_or(ordered.len());
            (placeholder, ordered[..end].to_vec())
        });
        tracing::info!(contact = %contact_id, channel = %channel, turn = %turn_id, "reroll started");

        let messages = self.prompt_for(&contact_id, &scope, &history);
        let reply = self
            .complete_turn(&api, &contact_id, &channel, placeholder, &messages)
            .await;
        Ok(Some(reply))
    }

    /// Alias kept for callers using the older name.
    pub async fn reroll_last_assistant(&self, args: RerollArgs) -> AppResult<Option<Message>> {
        self.reroll_last_turn(args).await
    }

    /// Deletes a turn's messages in one channel. Only the channel's last
    /// turn may be deleted; anything else returns false untouched.
    pub fn delete_turn(&self, args: DeleteTurnArgs) -> bool {
        let DeleteTurnArgs {
            contact_id,
            channel,
            turn_id,
        } = args;
        let Ok(contact_id) = self.resolve_contact(contact_id.as_deref()) else {
            return false;
        };
        if !self.is_last_turn(&contact_id, &channel, &turn_id) {
            tracing::warn!(contact = %contact_id, turn = %turn_id, "refusing to delete a turn that is not the last");
            return false;
        }
        self.mutate(Some(&contact_id), |state| state.delete_turn(&contact_id, &channel, &turn_id))
    }

    fn prompt_for(&self, contact_id: &str, scope: &str, history: &[Message]) -> Vec<ChatMessage> {
        let store = self.inner.store.as_ref();
        let system_prompt = prompt_engine::assemble(&load_prompt_config(store), &load_persona(store), contact_id, scope);
        context::build(history, &system_prompt, self.inner.config.max_context_chars)
    }

    /// Calls the endpoint, post-processes for the channel and overwrites the
    /// placeholder in place.
    async fn complete_turn(
        &self,
        api: &ApiConfig,
        contact_id: &str,
        channel: &Channel,
        placeholder: Message,
        messages: &[ChatMessage],
    ) -> Message {
        let temperature = api.temperature.unwrap_or(self.inner.config.temperature);
        let rules = self.inner.config.channel_rules(channel);

        let mut reply = placeholder;
        reply.meta.pending = false;
        let outcome = match self.inner.client.call(api, messages, temperature).await {
            Ok(raw) => finish_reply(&self.inner.client, api, &rules, &raw).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(processed) => {
                reply.content = processed.content;
                reply.meta.repaired = processed.repaired;
                reply.meta.truncated = processed.truncated;
            }
            Err(e) => {
                tracing::warn!(contact = %contact_id, turn = %reply.turn_id, error = %e, "completion failed");
                reply.content = format!("(error) {}", e);
                reply.meta.error = true;
            }
        }

        let written = self.mutate(Some(contact_id), |state| {
            match state.message_mut(contact_id, &reply.id) {
                Some(slot) => {
                    slot.content = reply.content.clone();
                    slot.meta = reply.meta.clone();
                    true
                }
                None => false,
            }
        });
        if !written {
            tracing::warn!(turn = %reply.turn_id, "placeholder vanished before the reply arrived");
        }

        let summary_due = self.inner.turns.record_turn();
        if summary_due {
            tracing::info!(contact = %contact_id, turns = self.inner.turns.completed(), "summary due");
        }
        let mut event = ChangeEvent::new(ChangeKind::TurnCompleted, Some(contact_id));
        event.summary_due = summary_due;
        self.emit(event);
        reply
    }
}

fn insert_placeholder(
    state: &mut EngineState,
    contact_id: &str,
    channel: &Channel,
    turn_id: &str,
) -> Message {
    let mut placeholder = state.append_message(contact_id, channel, Role::Assistant, "", Some(turn_id.to_string()));
    placeholder.meta.pending = true;
    if let Some(slot) = state.message_mut(contact_id, &placeholder.id) {
        slot.meta.pending = true;
    }
    placeholder
}
