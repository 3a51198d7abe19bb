use serde_json::{json, Value};

use super::types::ChatMessage;

const COMPLETIONS_SUFFIX: &str = "/chat/completions";

/// Canonical `<origin>[/prefix]/v1` base for a user-entered URL.
///
/// Whitespace and trailing slashes are trimmed and a pasted
/// `/chat/completions` suffix is dropped. When the path already contains a
/// `/v1` segment everything after it is cut, otherwise `/v1` is appended.
pub fn normalize_base_url(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/').to_string();
    while let Some(stripped) = base.strip_suffix(COMPLETIONS_SUFFIX) {
        base = stripped.trim_end_matches('/').to_string();
    }
    if base.is_empty() {
        return base;
    }

    match find_v1_segment(&base) {
        Some(end) => base.truncate(end),
        None => base.push_str("/v1"),
    }
    base
}

fn find_v1_segment(base: &str) -> Option<usize> {
    // ASCII lowering keeps byte offsets valid for `base`.
    let lowered = base.to_ascii_lowercase();
    lowered.match_indices("/v1").find_map(|(idx, _)| {
        let end = idx + 3;
        match lowered[end..].chars().next() {
            None | Some('/') => Some(end),
            _ => None,
        }
    })
}

/// `<base>/v1/chat/completions`. Idempotent.
pub fn chat_completions_endpoint(raw_base_url: &str) -> String {
    let base = normalize_base_url(raw_base_url);
    if base.is_empty() {
        return base;
    }
    format!("{}{}", base, COMPLETIONS_SUFFIX)
}

pub fn models_endpoint(raw_base_url: &str) -> String {
    let base = normalize_base_url(raw_base_url);
    if base.is_empty() {
        return base;
    }
    format!("{}/models", base)
}

pub fn build_request_body(model: &str, messages: &[ChatMessage], temperature: f64) -> Value {
    json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
        "stream": false,
    })
}

/// One known response shape. Returns the assistant text if the payload has
/// that shape and the text is not blank.
pub type Extractor = fn(&Value) -> Option<String>;

/// Tried in order; the first hit wins. New shapes are added here.
pub const EXTRACTORS: &[(&str, Extractor)] = &[
    ("choices[0].message.content", choice_message_content),
    ("choices[0].text", choice_text),
    ("candidates[0].content.parts", candidate_parts),
];

pub fn extract_text(data: &Value) -> Option<String> {
    EXTRACTORS.iter().find_map(|(_, extractor)| extractor(data))
}

fn first_choice(data: &Value) -> Option<&Value> {
    data.get("choices")?.as_array()?.first()
}

fn choice_message_content(data: &Value) -> Option<String> {
    let content = first_choice(data)?.get("message")?.get("content")?;
    join_text_fragments(content)
}

fn choice_text(data: &Value) -> Option<String> {
    let text = first_choice(data)?.get("text")?.as_str()?;
    non_blank(text.to_string())
}

fn candidate_parts(data: &Value) -> Option<String> {
    let parts = data
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let joined: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect();
    non_blank(joined)
}

/// Content may be a plain string or an array of `{type, text}` parts.
fn join_text_fragments(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.as_str()),
                other => other.get("text").and_then(|t| t.as_str()),
            })
            .collect(),
        _ => return None,
    };
    non_blank(text)
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Sorted, de-duplicated, non-empty ids from a `{data:[{id}]}` listing.
pub fn parse_model_list(payload: &Value) -> Vec<String> {
    let mut ids: Vec<String> = payload
        .get("data")
        .and_then(|d| d.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("id").and_then(|id| id.as_str()))
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect()
        })
        .unwrap_or_default();
    ids.sort();
    ids.dedup();
    ids
}
