use super::types::{ChatMessage, Message};

/// Prompt array for one contact: the system prompt (if any) followed by
/// every non-pending message across all channels in timestamp order.
///
/// When the total content length exceeds `max_chars`, messages are dropped
/// from the oldest end until the rest fits. The system message is never
/// dropped, even if it alone is over budget.
pub fn build(messages: &[Message], system_prompt: &str, max_chars: usize) -> Vec<ChatMessage> {
    let system = (!system_prompt.trim().is_empty()).then(|| ChatMessage::system(system_prompt));

    let mut ordered: Vec<&Message> = messages.iter().filter(|m| !m.meta.pending).collect();
    ordered.sort_by_key(|m| m.timestamp);

    let budget = max_chars.saturating_sub(system.as_ref().map(char_len).unwrap_or(0));
    let mut total: usize = ordered.iter().map(|m| m.content.chars().count()).sum();
    let mut skip = 0;
    while total > budget && skip < ordered.len() {
        total -= ordered[skip].content.chars().count();
        skip += 1;
    }
    if skip > 0 {
        tracing::debug!(dropped = skip, kept = ordered.len() - skip, max_chars, "context truncated");
    }

    system
        .into_iter()
        .chain(
            ordered[skip..]
                .iter()
                .map(|m| ChatMessage::new(m.role, m.content.clone())),
        )
        .collect()
}

fn char_len(message: &ChatMessage) -> usize {
    message.content.chars().count()
}
