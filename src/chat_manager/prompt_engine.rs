use crate::storage_manager::lorebook::{PromptConfig, PromptEntry};
use crate::storage_manager::personas::Persona;

fn persona_block(persona: &Persona) -> Option<String> {
    if !persona.is_configured() {
        return None;
    }
    let name = persona.name.trim();
    let bio = persona.bio.trim();
    let block = match (name.is_empty(), bio.is_empty()) {
        (false, false) => format!("# User's Character: {}\n{}", name, bio),
        (false, true) => format!("# User's Character: {}", name),
        _ => format!("# User's Character\n{}", bio),
    };
    Some(block)
}

fn active_contents(entries: &[PromptEntry]) -> impl Iterator<Item = String> + '_ {
    entries
        .iter()
        .filter(|entry| entry.is_active())
        .map(|entry| entry.content.trim().to_string())
}

/// System prompt for `contact_id` under `scope`: the persona block, global
/// world-book entries, the contact's world-book entries, then the scope's
/// presets, joined by blank lines. Empty when nothing is configured, which
/// callers treat as "no system message".
pub fn assemble(config: &PromptConfig, persona: &Persona, contact_id: &str, scope: &str) -> String {
    persona_block(persona)
        .into_iter()
        .chain(active_contents(&config.worldbook.global))
        .chain(active_contents(config.contact_entries(contact_id)))
        .chain(active_contents(config.scope_presets(scope)))
        .collect::<Vec<_>>()
        .join("\n\n")
}
