//! TikTok adapter (Content Posting API, direct post from URL)
//!
//! TikTok wraps every response in `{data, error: {code, message}}` where
//! `code` is `"ok"` on success. The error code decides retryability, not just
//! the HTTP status.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::http;
use super::{check_length, PlatformAdapter, PublishResult};
use crate::connections::ConnectionCredentials;
use crate::error::{ErrorKind, PublishError};
use crate::types::{ContentSnapshot, IdempotencyKey, Platform};

pub const DEFAULT_BASE_URL: &str = "https://open.tiktokapis.com";
pub const TITLE_LIMIT: usize = 2_200;

const RETRYABLE_CODES: [&str; 3] = ["rate_limit_exceeded", "internal_error", "spam_risk_too_many_posts"];

pub struct TiktokAdapter {
    client: Client,
    base_url: String,
}

impl TiktokAdapter {
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

fn classify(body: &Value, fallback: Option<PublishError>) -> Result<(), PublishError> {
    let code = body
        .pointer("/error/code")
        .and_then(Value::as_str)
        .unwrap_or("ok");
    if code == "ok" {
        return match fallback {
            Some(error) => Err(error),
            None => Ok(()),
        };
    }

    let message = body
        .pointer("/error/message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(code);
    let kind = if RETRYABLE_CODES.contains(&code) {
        ErrorKind::Transient
    } else {
        fallback
            .as_ref()
            .map(|e| e.kind)
            .filter(|k| *k == ErrorKind::Transient)
            .unwrap_or(ErrorKind::Permanent)
    };
    Err(PublishError {
        kind,
        code: fallback.and_then(|e| e.code),
        message: format!("tiktok rejected post ({}): {}", code, message),
    })
}

#[async_trait]
impl PlatformAdapter for TiktokAdapter {
    fn platform(&self) -> Platform {
        Platform::Tiktok
    }

    fn validate(&self, content: &ContentSnapshot) -> Result<(), PublishError> {
        if content.videos().next().is_none() {
            return Err(PublishError::permanent("TikTok posts require a video"));
        }
        check_length(Platform::Tiktok, &content.as_text(), TITLE_LIMIT)
    }

    async fn publish(
        &self,
        content: &ContentSnapshot,
        credentials: &ConnectionCredentials,
        idempotency_key: &IdempotencyKey,
    ) -> PublishResult {
        let video = content
            .videos()
            .next()
            .ok_or_else(|| PublishError::permanent("TikTok posts require a video"))?;
        let url = format!(
            "{}/v2/post/publish/video/init/",
            self.base_url.trim_end_matches('/')
        );
        let payload = json!({
            "post_info": {
                "title": content.as_text(),
                "privacy_level": "PUBLIC_TO_EVERYONE"
            },
            "source_info": {
                "source": "PULL_FROM_URL",
                "video_url": video.url
            }
        });

        let request = self.client.post(&url).json(&payload);
        let request = http::with_idempotency(http::bearer(request, credentials), idempotency_key);
        let response = request
            .send()
            .await
            .map_err(|e| http::transport_error(Platform::Tiktok, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| http::transport_error(Platform::Tiktok, e))?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        let status_failure = (!status.is_success())
            .then(|| http::status_error(Platform::Tiktok, status, &body));
        classify(&body, status_failure)?;
        http::required_str(Platform::Tiktok, &body, "/data/publish_id")
    }
}
