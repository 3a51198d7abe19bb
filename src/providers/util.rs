use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;

use super::config::{build_auth_header, AuthStyle};
use crate::error::{AppError, AppResult};

/// JSON request headers plus the provider's auth header, if a key is set.
pub fn build_headers(
    base_url: &str,
    api_key: &str,
    override_style: Option<&AuthStyle>,
) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some((name, value)) = build_auth_header(base_url, api_key, override_style) {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::config(format!("invalid auth header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| AppError::config(format!("invalid api key header value: {}", e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Provider error text from a JSON error body.
pub fn extract_error_message(payload: &Value) -> Option<String> {
    if let Some(error) = payload.get("error") {
        return match error {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => match (map.get("message"), map.get("type")) {
                (Some(Value::String(message)), _) => Some(message.clone()),
                (_, Some(Value::String(typ))) => Some(typ.clone()),
                _ => Some(error.to_string()),
            },
            Value::Null => None,
            other => Some(other.to_string()),
        };
    }
    match payload.get("message") {
        Some(Value::String(message)) => Some(message.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::AUTHORIZATION;
    use serde_json::json;

    #[test]
    fn headers_skip_auth_without_key() {
        let headers = build_headers("https://api.x.com", "", None).unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn headers_carry_provider_header() {
        let headers = build_headers("https://api.anthropic.com", "sk-ant", None).unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant");
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn control_characters_in_key_are_config_errors() {
        let err = build_headers("https://api.x.com", "bad\nkey", None).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn error_message_shapes() {
        assert_eq!(
            extract_error_message(&json!({"error": {"message": "quota"}})).as_deref(),
            Some("quota")
        );
        assert_eq!(
            extract_error_message(&json!({"error": {"type": "invalid_request"}})).as_deref(),
            Some("invalid_request")
        );
        assert_eq!(extract_error_message(&json!({"error": "nope"})).as_deref(), Some("nope"));
        assert_eq!(extract_error_message(&json!({"message": "m"})).as_deref(), Some("m"));
        assert!(extract_error_message(&json!({"choices": []})).is_none());
    }
}
