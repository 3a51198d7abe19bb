use serde::{Deserialize, Serialize};

/// How the API key is attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "header")]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `Authorization: <key>` with no scheme prefix.
    Raw,
    /// The key as the value of a provider-specific header.
    Header(String),
}

impl Default for AuthStyle {
    fn default() -> Self {
        AuthStyle::Bearer
    }
}

impl AuthStyle {
    /// Header name and value for `api_key`. `None` when the key is blank.
    pub fn header_for(&self, api_key: &str) -> Option<(String, String)> {
        let key = api_key.trim();
        if key.is_empty() {
            return None;
        }
        Some(match self {
            AuthStyle::Bearer => ("Authorization".to_string(), format!("Bearer {}", key)),
            AuthStyle::Raw => ("Authorization".to_string(), key.to_string()),
            AuthStyle::Header(name) => (name.clone(), key.to_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    /// Matched as a substring of the base URL host.
    pub host_pattern: String,
    pub auth_style: AuthStyle,
}

pub fn get_provider_configs() -> Vec<ProviderConfig> {
    get_all_provider_configs_internal()
}

fn get_all_provider_configs_internal() -> Vec<ProviderConfig> {
    let table = vec![
        ("azure", "Azure OpenAI", "openai.azure.com", AuthStyle::Header("api-key".into())),
        (
            "gemini",
            "Google Gemini",
            "generativelanguage.googleapis.com",
            AuthStyle::Header("x-goog-api-key".into()),
        ),
        ("anthropic", "Anthropic", "api.anthropic.com", AuthStyle::Header("x-api-key".into())),
        ("zhipu", "Zhipu AI", "open.bigmodel.cn", AuthStyle::Raw),
    ];

    table
        .into_iter()
        .map(|(id, name, host, auth_style)| ProviderConfig {
            id: id.to_string(),
            name: name.to_string(),
            host_pattern: host.to_string(),
            auth_style,
        })
        .collect()
}

fn host_of(base_url: &str) -> String {
    let trimmed = base_url.trim();
    match url::Url::parse(trimmed) {
        Ok(parsed) => parsed.host_str().unwrap_or_default().to_ascii_lowercase(),
        Err(_) => trimmed.to_ascii_lowercase(),
    }
}

/// First provider whose host pattern occurs in the base URL's host.
pub fn provider_for_url(base_url: &str) -> Option<ProviderConfig> {
    let host = host_of(base_url);
    if host.is_empty() {
        return None;
    }
    get_all_provider_configs_internal()
        .into_iter()
        .find(|p| host.contains(&p.host_pattern))
}

pub fn resolve_auth_style(base_url: &str, override_style: Option<&AuthStyle>) -> AuthStyle {
    if let Some(style) = override_style {
        return style.clone();
    }
    provider_for_url(base_url)
        .map(|p| p.auth_style)
        .unwrap_or_default()
}

/// The single auth header for `base_url`, or `None` without a key.
pub fn build_auth_header(
    base_url: &str,
    api_key: &str,
    override_style: Option<&AuthStyle>,
) -> Option<(String, String)> {
    resolve_auth_style(base_url, override_style).header_for(api_key)
}
