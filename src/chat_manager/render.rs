use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use super::postprocess::sanitize_model_text;
use crate::storage_manager::{read_json_or_default, KeyValueStore, RENDER_REGEX_KEY};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderRule {
    pub pattern: String,
    /// JS-style flags: `g` replaces every match, `i`, `m` and `s` map to
    /// the matching regex options.
    pub flags: Option<String>,
    pub replace: String,
    pub enabled: bool,
}

/// User-defined display rewrites. Applied to what is shown, never to what
/// is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderRegexConfig {
    pub enabled: bool,
    pub rules: Vec<RenderRule>,
}

impl Default for RenderRegexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
        }
    }
}

impl RenderRegexConfig {
    pub fn load(store: &dyn KeyValueStore) -> Self {
        read_json_or_default(store, RENDER_REGEX_KEY)
    }

    /// Applies enabled rules in order. Invalid patterns are skipped.
    pub fn apply(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        self.rules
            .iter()
            .filter(|rule| rule.enabled && !rule.pattern.is_empty())
            .fold(text.to_string(), |acc, rule| apply_rule(rule, &acc))
    }
}

fn apply_rule(rule: &RenderRule, text: &str) -> String {
    let flags = rule.flags.as_deref().unwrap_or("g");
    let regex = match RegexBuilder::new(&rule.pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
    {
        Ok(regex) => regex,
        Err(e) => {
            tracing::debug!(pattern = %rule.pattern, error = %e, "skipping invalid render rule");
            return text.to_string();
        }
    };
    let replacement = translate_replacement(&rule.replace);
    if flags.contains('g') {
        regex.replace_all(text, replacement.as_str()).into_owned()
    } else {
        regex.replace(text, replacement.as_str()).into_owned()
    }
}

/// Converts `$&`, `$<name>` and `$1` references to `${0}`, `${name}` and
/// `${1}`.
fn translate_replacement(replace: &str) -> String {
    let mut out = String::with_capacity(replace.len());
    let mut chars = replace.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('&') => {
                chars.next();
                out.push_str("${0}");
            }
            Some('$') => {
                chars.next();
                out.push_str("$$");
            }
            Some('<') => {
                chars.next();
                let name: String = chars.by_ref().take_while(|c| *c != '>').collect();
                out.push_str(&format!("${{{}}}", name));
            }
            Some(d) if d.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                out.push_str(&format!("${{{}}}", digits));
            }
            _ => out.push_str("$$"),
        }
    }
    out
}

/// Text as rendered in a bubble: reasoning stripped, then display rules.
pub fn display_text(content: &str, rules: &RenderRegexConfig) -> String {
    rules.apply(&sanitize_model_text(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, flags: Option<&str>, replace: &str) -> RenderRule {
        RenderRule {
            pattern: pattern.into(),
            flags: flags.map(Into::into),
            replace: replace.into(),
            enabled: true,
        }
    }

    #[test]
    fn rules_apply_in_order() {
        let config = RenderRegexConfig {
            enabled: true,
            rules: vec![
                rule(r"\*(.+?)\*", None, "($1)"),
                rule("HELLO", Some("i"), "hi"),
                rule("(", None, "never"),
                RenderRule {
                    enabled: false,
                    ..rule("hi", None, "x")
                },
            ],
        };
        assert_eq!(config.apply("*smiles* hello hello"), "(smiles) hi hello");
    }

    #[test]
    fn disabled_config_is_identity() {
        let config = RenderRegexConfig {
            enabled: false,
            rules: vec![rule("a", None, "b")],
        };
        assert_eq!(config.apply("aaa"), "aaa");
    }

    #[test]
    fn replacement_references_translate() {
        assert_eq!(translate_replacement("[$&]"), "[${0}]");
        assert_eq!(translate_replacement("$<who>!"), "${who}!");
        assert_eq!(translate_replacement("$1x"), "${1}x");
        assert_eq!(translate_replacement("$ 5"), "$$ 5");
    }

    #[test]
    fn display_strips_reasoning_first() {
        let config = RenderRegexConfig::default();
        assert_eq!(display_text("<think>x</think> hi", &config), "hi");
    }
}
