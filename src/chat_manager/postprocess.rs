//! Channel post-processing applied to every reply before it is persisted.
//!
//! Order: reasoning blocks are stripped, restrictive channels get a format
//! check with one repair round-trip, then the channel length cap applies.

use regex::Regex;

use super::client::CompletionClient;
use super::types::ChatMessage;
use crate::config::{ChannelRules, ComplianceRules};
use crate::error::{AppError, AppResult};
use crate::storage_manager::settings::ApiConfig;
use crate::utils::take_chars;

pub const TRUNCATION_SUFFIX: &str = "\n…(truncated, reply \"continue\" for more)";

const BOUNDARY_CHARS: [char; 7] = ['\n', '。', '！', '？', '.', '!', '?'];
const REPAIR_TEMPERATURE: f64 = 0.3;

lazy_static::lazy_static! {
    static ref REASONING_BLOCK: Option<Regex> =
        Regex::new(r"(?is)<think>.*?</think>|<analysis>.*?</analysis>").ok();
    static ref UNTERMINATED_THINK: Option<Regex> = Regex::new(r"(?is)^\s*<think>.*$").ok();
    static ref ORPHAN_THINK_CLOSE: Option<Regex> = Regex::new(r"(?is)^.*?</think>").ok();
    static ref MARKDOWN_HEADER: Option<Regex> = Regex::new(r"^#{1,6}\s").ok();
    static ref MARKDOWN_LIST: Option<Regex> = Regex::new(r"^([-*+]|\d+[.)])\s").ok();
}

fn remove(pattern: &Option<Regex>, text: &str) -> String {
    match pattern {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

fn is_match(pattern: &Option<Regex>, text: &str) -> bool {
    pattern.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
}

/// Removes `<think>`/`<analysis>` blocks, a leading unterminated `<think>`
/// and anything before a stray `</think>`.
pub fn sanitize_model_text(text: &str) -> String {
    let out = remove(&REASONING_BLOCK, text);
    let out = remove(&UNTERMINATED_THINK, &out);
    let out = remove(&ORPHAN_THINK_CLOSE, &out);
    out.trim().to_string()
}

/// Cuts `text` to `max` chars, preferring the last sentence or line
/// boundary in the second half of the kept text. Returns whether it cut.
pub fn cap_length(text: &str, max: usize) -> (String, bool) {
    if text.chars().count() <= max {
        return (text.to_string(), false);
    }
    let head = take_chars(text, max);
    let cut = head
        .char_indices()
        .enumerate()
        .filter(|(_, (_, c))| BOUNDARY_CHARS.contains(c))
        .last()
        .filter(|(char_pos, _)| *char_pos >= max / 2)
        .map(|(_, (byte_idx, c))| &head[..byte_idx + c.len_utf8()])
        .unwrap_or(head);
    (format!("{}{}", cut.trim_end(), TRUNCATION_SUFFIX), true)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComplianceIssue {
    MissingPrefix,
    MarkdownHeader,
    MarkdownList,
    CodeFence,
    TooMuchLatin(f64),
}

/// Format problems of `text` under `rules`; empty when it complies.
pub fn check_compliance(text: &str, rules: &ComplianceRules) -> Vec<ComplianceIssue> {
    let mut issues = Vec::new();
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let prefixed = |line: &str| rules.line_prefixes.iter().any(|p| line.starts_with(p.as_str()));
    if !lines.iter().any(|line| prefixed(line)) {
        issues.push(ComplianceIssue::MissingPrefix);
    }
    if lines.iter().any(|line| is_match(&MARKDOWN_HEADER, line)) {
        issues.push(ComplianceIssue::MarkdownHeader);
    }
    if lines.iter().any(|line| is_match(&MARKDOWN_LIST, line)) {
        issues.push(ComplianceIssue::MarkdownList);
    }
    if text.contains("```") {
        issues.push(ComplianceIssue::CodeFence);
    }

    let ratio = latin_ratio(&lines, &rules.line_prefixes);
    if ratio > rules.max_latin_ratio {
        issues.push(ComplianceIssue::TooMuchLatin(ratio));
    }
    issues
}

/// Share of ASCII letters among visible chars, ignoring line prefixes.
fn latin_ratio(lines: &[&str], prefixes: &[String]) -> f64 {
    let mut visible = 0usize;
    let mut latin = 0usize;
    for line in lines {
        let body = prefixes
            .iter()
            .find_map(|p| line.strip_prefix(p.as_str()))
            .unwrap_or(line);
        for c in body.chars().filter(|c| !c.is_whitespace()) {
            visible += 1;
            if c.is_ascii_alphabetic() {
                latin += 1;
            }
        }
    }
    if visible == 0 {
        0.0
    } else {
        latin as f64 / visible as f64
    }
}

pub fn repair_messages(text: &str, rules: &ComplianceRules) -> Vec<ChatMessage> {
    let system = format!(
        "Rewrite the user's text into phone message format without changing its meaning or language.\n\
         Every line must start with one of: {}.\n\
         Do not use Markdown headings, lists or code blocks.\n\
         Avoid English words unless they are names.\n\
         Output only the rewritten lines.",
        rules.line_prefixes.join(" ")
    );
    vec![ChatMessage::system(system), ChatMessage::user(text)]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    pub content: String,
    pub repaired: bool,
    pub truncated: bool,
}

/// Full post-processing of a raw model reply for one channel. A reply that
/// is nothing but reasoning is an error.
pub async fn finish_reply(
    client: &CompletionClient,
    api: &ApiConfig,
    rules: &ChannelRules,
    raw: &str,
) -> AppResult<Processed> {
    let mut content = sanitize_model_text(raw);
    if content.trim().is_empty() {
        return Err(AppError::Other("empty reply after removing reasoning".to_string()));
    }
    let mut repaired = false;

    if let Some(compliance) = &rules.compliance {
        let issues = check_compliance(&content, compliance);
        if !issues.is_empty() {
            tracing::info!(?issues, "reply failed format check, requesting rewrite");
            match client
                .call(api, &repair_messages(&content, compliance), REPAIR_TEMPERATURE)
                .await
            {
                Ok(rewritten) => {
                    let rewritten = sanitize_model_text(&rewritten);
                    if !rewritten.is_empty() {
                        content = rewritten;
                        repaired = true;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "rewrite failed, keeping original reply"),
            }
        }
    }

    let mut truncated = false;
    if let Some(max) = rules.max_chars {
        let (capped, cut) = cap_length(&content, max);
        content = capped;
        truncated = cut;
    }

    Ok(Processed {
        content,
        repaired,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn reasoning_is_stripped() {
        assert_eq!(sanitize_model_text("<think>plan</think>\nHello"), "Hello");
        assert_eq!(sanitize_model_text("A<ANALYSIS>x\ny</analysis>B"), "AB");
        assert_eq!(sanitize_model_text("  <think>never closed..."), "");
        assert_eq!(sanitize_model_text("leaked reasoning</think>answer"), "answer");
        assert_eq!(sanitize_model_text("plain"), "plain");
    }

    #[test]
    fn cap_prefers_sentence_boundary() {
        let text = "第一句。第二句很长很长很长很长";
        let (out, cut) = cap_length(text, 6);
        assert!(cut);
        assert_eq!(out, format!("第一句。{}", TRUNCATION_SUFFIX));

        let (out, cut) = cap_length("abcdefghij", 4);
        assert!(cut);
        assert!(out.starts_with("abcd\n…"));

        assert_eq!(cap_length("short", 10), ("short".to_string(), false));
    }

    #[test]
    fn early_boundaries_are_ignored() {
        let (out, _) = cap_length("a. bcdefghijklmnop", 10);
        assert!(out.starts_with("a. bcdefgh"));
    }

    #[test]
    fn compliance_rules() {
        let rules = ComplianceRules::default();
        assert!(check_compliance("[SMS] 在吗\n[STICKER] 笑脸", &rules).is_empty());

        let issues = check_compliance("# Title\n- item\n```x```", &rules);
        assert!(issues.contains(&ComplianceIssue::MissingPrefix));
        assert!(issues.contains(&ComplianceIssue::MarkdownHeader));
        assert!(issues.contains(&ComplianceIssue::MarkdownList));
        assert!(issues.contains(&ComplianceIssue::CodeFence));

        let issues = check_compliance("[SMS] hello there my friend", &rules);
        assert!(matches!(issues.as_slice(), [ComplianceIssue::TooMuchLatin(_)]));
    }

    fn sms_rules() -> ChannelRules {
        ChannelRules {
            max_chars: Some(600),
            compliance: Some(ComplianceRules::default()),
        }
    }

    #[tokio::test]
    async fn failing_reply_is_repaired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"choices": [{"message": {"content": "[SMS] 到了"}}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = CompletionClient::new(5_000).unwrap();
        let api = ApiConfig::new(&server.uri(), "k", "m");
        let out = finish_reply(&client, &api, &sms_rules(), "<think>x</think>## 到了").await.unwrap();
        assert_eq!(out.content, "[SMS] 到了");
        assert!(out.repaired);
        assert!(!out.truncated);
    }

    #[tokio::test]
    async fn failed_repair_keeps_stripped_original() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = CompletionClient::new(5_000).unwrap();
        let api = ApiConfig::new(&server.uri(), "k", "m");
        let out = finish_reply(&client, &api, &sms_rules(), "<think>x</think>到了").await.unwrap();
        assert_eq!(out.content, "到了");
        assert!(!out.repaired);
    }

    #[tokio::test]
    async fn compliant_reply_makes_no_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let client = CompletionClient::new(5_000).unwrap();
        let api = ApiConfig::new(&server.uri(), "k", "m");
        let out = finish_reply(&client, &api, &sms_rules(), "[VOICE] 好").await.unwrap();
        assert_eq!(out.content, "[VOICE] 好");
    }
}
