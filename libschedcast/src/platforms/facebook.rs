//! Facebook Page adapter (Graph API)
//!
//! Text posts go to `/{page-id}/feed`; posts with an image go to
//! `/{page-id}/photos` with the first image URL. The Graph API reports rate
//! limiting as HTTP 400 with an application error code, so those codes are
//! reclassified as transient.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::http;
use super::{check_length, PlatformAdapter, PublishResult};
use crate::connections::ConnectionCredentials;
use crate::error::{ErrorKind, PublishError};
use crate::types::{ContentSnapshot, IdempotencyKey, Platform};

pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v19.0";
pub const CHARACTER_LIMIT: usize = 63_206;

/// Graph API error codes that mean "slow down" or "try again"
const RETRYABLE_CODES: [i64; 6] = [1, 2, 4, 17, 32, 613];

pub struct FacebookAdapter {
    client: Client,
    base_url: String,
}

impl FacebookAdapter {
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

/// Reclassify a Graph API error body. Returns `error` unchanged when the body
/// carries no retryable application code.
pub(crate) fn classify_graph_error(
    error: PublishError,
    body: &Value,
    extra_retryable: &[i64],
) -> PublishError {
    let graph_code = body.pointer("/error/code").and_then(Value::as_i64);
    let is_transient_flag = body
        .pointer("/error/is_transient")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    match graph_code {
        Some(code)
            if RETRYABLE_CODES.contains(&code)
                || extra_retryable.contains(&code)
                || is_transient_flag =>
        {
            PublishError {
                kind: ErrorKind::Transient,
                ..error
            }
        }
        _ => error,
    }
}

/// Graph API variant of [`http::send_json`] that applies
/// [`classify_graph_error`].
pub(crate) async fn send_graph(
    platform: Platform,
    request: reqwest::RequestBuilder,
    extra_retryable: &[i64],
) -> Result<Value, PublishError> {
    let response = request
        .send()
        .await
        .map_err(|e| http::transport_error(platform, e))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| http::transport_error(platform, e))?;
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

    if status.is_success() {
        return Ok(body);
    }
    Err(classify_graph_error(
        http::status_error(platform, status, &body),
        &body,
        extra_retryable,
    ))
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    fn validate(&self, content: &ContentSnapshot) -> Result<(), PublishError> {
        check_length(Platform::Facebook, &content.as_text(), CHARACTER_LIMIT)
    }

    async fn publish(
        &self,
        content: &ContentSnapshot,
        credentials: &ConnectionCredentials,
        idempotency_key: &IdempotencyKey,
    ) -> PublishResult {
        let page_id = http::account_ref(Platform::Facebook, credentials)?;
        let base = self.base_url.trim_end_matches('/');
        let message = content.as_text();

        let (url, payload, id_pointer) = match content.images().next() {
            Some(image) => (
                format!("{}/{}/photos", base, page_id),
                json!({ "url": image.url, "caption": message }),
                "/post_id",
            ),
            None => (
                format!("{}/{}/feed", base, page_id),
                json!({ "message": message }),
                "/id",
            ),
        };

        let request = self.client.post(&url).json(&payload);
        let request = http::with_idempotency(http::bearer(request, credentials), idempotency_key);
        let body = send_graph(Platform::Facebook, request, &[]).await?;

        // Photo uploads without a feed story only return the photo id
        http::required_str(Platform::Facebook, &body, id_pointer)
            .or_else(|_| http::required_str(Platform::Facebook, &body, "/id"))
    }
}
