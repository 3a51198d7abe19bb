use std::time::Duration;

use reqwest::header::HeaderMap;
use serde_json::Value;

use super::request::{build_request_body, chat_completions_endpoint, extract_text, models_endpoint, parse_model_list};
use super::types::ChatMessage;
use crate::error::{AppError, AppResult};
use crate::providers::{build_headers, extract_error_message, AuthStyle};
use crate::serde_utils::{parse_body_to_value, sanitize_header_value, summarize_json, truncate_for_log};
use crate::storage_manager::settings::ApiConfig;
use crate::utils::take_chars;

const ERROR_BODY_CHARS: usize = 300;
const RAW_DUMP_CHARS: usize = 500;
const TEST_CHAT_TEMPERATURE: f64 = 0.2;

/// Non-streaming client for OpenAI-compatible completions endpoints.
#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
}

impl CompletionClient {
    pub fn new(timeout_ms: u64) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self { http })
    }

    /// POSTs the conversation and returns the assistant text.
    ///
    /// Missing base URL or model fail with [`AppError::Config`] before any
    /// request is made. Non-2xx statuses, unparseable bodies and unknown
    /// response shapes fail with [`AppError::Other`].
    pub async fn call(
        &self,
        api: &ApiConfig,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> AppResult<String> {
        ensure_ready(api)?;
        let url = chat_completions_endpoint(&api.base_url);
        let headers = build_headers(&api.base_url, &api.api_key, api.auth_style.as_ref())?;
        let body = build_request_body(api.model.trim(), messages, temperature);

        tracing::info!(
            url = %url,
            model = %api.model,
            messages = messages.len(),
            headers = ?header_preview(&headers),
            "completion request"
        );
        tracing::debug!(body = %summarize_json(&body), "completion body");

        let response = self.http.post(&url).headers(headers).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), body = %truncate_for_log(&text, 200), "completion failed");
            return Err(http_error(status.as_u16(), &text));
        }

        let payload: Value = serde_json::from_str(&text).map_err(|_| {
            AppError::Other(format!(
                "unparseable response: {}",
                take_chars(&text, RAW_DUMP_CHARS)
            ))
        })?;

        match extract_text(&payload) {
            Some(reply) => {
                tracing::info!(status = status.as_u16(), chars = reply.chars().count(), "completion ok");
                Ok(reply)
            }
            None => {
                let raw = payload.to_string();
                tracing::warn!(payload = %truncate_for_log(&raw, 200), "no assistant text in response");
                Err(AppError::Other(format!(
                    "no assistant text in response: {}",
                    take_chars(&raw, RAW_DUMP_CHARS)
                )))
            }
        }
    }

    /// GETs `<base>/v1/models`. An empty list is returned as-is.
    pub async fn fetch_model_list(
        &self,
        base_url: &str,
        api_key: &str,
        auth_style: Option<&AuthStyle>,
    ) -> AppResult<Vec<String>> {
        if base_url.trim().is_empty() {
            return Err(AppError::config("missing base URL"));
        }
        let url = models_endpoint(base_url);
        let headers = build_headers(base_url, api_key, auth_style)?;
        tracing::info!(url = %url, headers = ?header_preview(&headers), "model list request");

        let response = self.http.get(&url).headers(headers).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(http_error(status.as_u16(), &text));
        }

        let models = parse_model_list(&parse_body_to_value(&text));
        tracing::info!(count = models.len(), "model list fetched");
        Ok(models)
    }

    /// Connectivity probe used by the settings panel.
    pub async fn test_chat(&self, api: &ApiConfig) -> AppResult<String> {
        ensure_ready(api)?;
        let messages = [
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user("ping"),
        ];
        self.call(api, &messages, TEST_CHAT_TEMPERATURE).await
    }
}

pub(crate) fn ensure_ready(api: &ApiConfig) -> AppResult<()> {
    if api.is_ready() {
        return Ok(());
    }
    if api.base_url.trim().is_empty() {
        return Err(AppError::config("missing base URL"));
    }
    Err(AppError::config("missing model"))
}

fn http_error(status: u16, body: &str) -> AppError {
    let detail = extract_error_message(&parse_body_to_value(body))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| body.to_string());
    AppError::Other(format!(
        "API error {}: {}",
        status,
        take_chars(detail.trim(), ERROR_BODY_CHARS)
    ))
}

fn header_preview(headers: &HeaderMap) -> Vec<String> {
    headers
        .iter()
        .map(|(key, value)| {
            let value = value.to_str().unwrap_or("<binary>");
            format!("{}={}", key, sanitize_header_value(key.as_str(), value))
        })
        .collect()
}
