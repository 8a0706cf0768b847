//! Twitter/X adapter using the v2 manage-tweets endpoint

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::http;
use super::{check_length, PlatformAdapter, PublishResult};
use crate::connections::ConnectionCredentials;
use crate::error::PublishError;
use crate::types::{ContentSnapshot, IdempotencyKey, Platform};

pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com";
pub const CHARACTER_LIMIT: usize = 280;

pub struct TwitterAdapter {
    client: Client,
    base_url: String,
}

impl TwitterAdapter {
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Tweet text: title and body, then any media links on their own lines.
    pub fn render(content: &ContentSnapshot) -> String {
        let mut text = content.as_text();
        for media in &content.media {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&media.url);
        }
        text
    }
}

#[async_trait]
impl PlatformAdapter for TwitterAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn validate(&self, content: &ContentSnapshot) -> Result<(), PublishError> {
        check_length(Platform::Twitter, &Self::render(content), CHARACTER_LIMIT)
    }

    async fn publish(
        &self,
        content: &ContentSnapshot,
        credentials: &ConnectionCredentials,
        idempotency_key: &IdempotencyKey,
    ) -> PublishResult {
        let url = format!("{}/2/tweets", self.base_url.trim_end_matches('/'));
        let request = self
            .client
            .post(&url)
            .json(&json!({ "text": Self::render(content) }));
        let request = http::with_idempotency(http::bearer(request, credentials), idempotency_key);

        let body = http::send_json(Platform::Twitter, request).await?;
        http::required_str(Platform::Twitter, &body, "/data/id")
    }
}
