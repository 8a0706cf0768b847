//! HTTP plumbing shared by the platform adapters

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use std::time::Duration;

use crate::connections::ConnectionCredentials;
use crate::error::{ConfigError, PublishError, Result, SchedcastError};
use crate::types::{IdempotencyKey, Platform};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("schedcast/", env!("CARGO_PKG_VERSION")))
        .build()
        // Only fails if the TLS backend cannot initialize
        .map_err(|e| {
            SchedcastError::Config(ConfigError::Invalid {
                field: "publish".to_string(),
                reason: format!("HTTP client initialization failed: {}", e),
            })
        })
}

pub fn bearer(builder: RequestBuilder, credentials: &ConnectionCredentials) -> RequestBuilder {
    builder.bearer_auth(credentials.token.expose_secret())
}

pub fn with_idempotency(builder: RequestBuilder, key: &IdempotencyKey) -> RequestBuilder {
    builder.header(IDEMPOTENCY_HEADER, key.as_str())
}

/// The platform-side account id an API path needs, e.g. a Facebook page id.
pub fn account_ref<'a>(
    platform: Platform,
    credentials: &'a ConnectionCredentials,
) -> std::result::Result<&'a str, PublishError> {
    credentials
        .account_ref
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| {
            PublishError::permanent(format!(
                "{} connection {} has no account reference",
                platform, credentials.connection_id
            ))
        })
}

/// Transport-level failure. Nothing reached the platform, or we cannot tell,
/// so retrying is the right call.
pub fn transport_error(platform: Platform, error: reqwest::Error) -> PublishError {
    if error.is_builder() {
        return PublishError::permanent(format!("{} request could not be built: {}", platform, error));
    }
    let what = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    PublishError::transient(format!("{} {}: {}", platform, what, error))
}

/// Send and decode a JSON response, classifying non-2xx statuses.
pub async fn send_json(platform: Platform, request: RequestBuilder) -> std::result::Result<Value, PublishError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(platform, e))?;
    read_json(platform, response).await
}

pub async fn read_json(platform: Platform, response: Response) -> std::result::Result<Value, PublishError> {
    let status = response.status();
    let body = response.text().await.map_err(|e| transport_error(platform, e))?;
    let json: Value = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or_else(|_| Value::String(body.clone()))
    };

    if status.is_success() {
        return Ok(json);
    }
    Err(status_error(platform, status, &json))
}

pub fn status_error(platform: Platform, status: StatusCode, body: &Value) -> PublishError {
    let detail = error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    });
    PublishError::from_status(
        status.as_u16(),
        format!("{} returned {}: {}", platform, status.as_u16(), detail),
    )
}

/// Pull a human-readable message out of the common error body shapes.
pub fn error_message(body: &Value) -> Option<String> {
    let candidates = [
        body.pointer("/error/message"),
        body.pointer("/errors/0/message"),
        body.pointer("/detail"),
        body.pointer("/message"),
        body.pointer("/error_description"),
        body.pointer("/error"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
        .or_else(|| body.as_str().filter(|s| !s.is_empty()).map(str::to_string))
}

/// A field the platform promised in a success response. Its absence means
/// we cannot tell whether the post exists, so the attempt is transient; the
/// idempotency key covers the retry.
pub fn required_str(platform: Platform, body: &Value, pointer: &str) -> std::result::Result<String, PublishError> {
    match body.pointer(pointer) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PublishError::transient(format!(
            "{} response missing {}",
            platform, pointer
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(&json!({"error": {"message": "Invalid OAuth access token."}})).as_deref(),
            Some("Invalid OAuth access token.")
        );
        assert_eq!(
            error_message(&json!({"errors": [{"message": "Duplicate content"}]})).as_deref(),
            Some("Duplicate content")
        );
        assert_eq!(
            error_message(&json!({"detail": "Too Many Requests"})).as_deref(),
            Some("Too Many Requests")
        );
        assert_eq!(error_message(&json!("plain text body")).as_deref(), Some("plain text body"));
        assert_eq!(error_message(&json!({"unrelated": 1})), None);
    }

    #[test]
    fn test_status_error_classification() {
        let unavailable = status_error(Platform::Facebook, StatusCode::SERVICE_UNAVAILABLE, &Value::Null);
        assert!(unavailable.is_transient());
        assert_eq!(unavailable.code, Some(503));
        assert!(unavailable.message.contains("Service Unavailable"));

        let unauthorized = status_error(
            Platform::Twitter,
            StatusCode::UNAUTHORIZED,
            &json!({"detail": "Unauthorized"}),
        );
        assert!(!unauthorized.is_transient());
        assert!(unauthorized.message.starts_with("twitter returned 401"));
    }

    #[test]
    fn test_required_str_accepts_numbers() {
        assert_eq!(required_str(Platform::Website, &json!({"id": 42}), "/id").unwrap(), "42");
        assert_eq!(
            required_str(Platform::Twitter, &json!({"data": {"id": "1790"}}), "/data/id").unwrap(),
            "1790"
        );
        let missing = required_str(Platform::Twitter, &json!({}), "/data/id").unwrap_err();
        assert!(missing.is_transient());
    }
}
