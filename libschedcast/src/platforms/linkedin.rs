//! LinkedIn adapter (versioned Posts API)

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::http;
use super::{check_length, PlatformAdapter, PublishResult};
use crate::connections::ConnectionCredentials;
use crate::error::PublishError;
use crate::types::{ContentSnapshot, IdempotencyKey, Platform};

pub const DEFAULT_BASE_URL: &str = "https://api.linkedin.com";
pub const CHARACTER_LIMIT: usize = 3_000;
pub const API_VERSION: &str = "202401";

pub struct LinkedinAdapter {
    client: Client,
    base_url: String,
}

impl LinkedinAdapter {
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn commentary(content: &ContentSnapshot) -> String {
        let mut text = content.as_text();
        for media in &content.media {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&media.url);
        }
        text
    }

    pub fn payload(author: &str, content: &ContentSnapshot) -> Value {
        json!({
            "author": author,
            "commentary": Self::commentary(content),
            "visibility": "PUBLIC",
            "distribution": {
                "feedDistribution": "MAIN_FEED",
                "targetEntities": [],
                "thirdPartyDistributionChannels": []
            },
            "lifecycleState": "PUBLISHED",
            "isReshareDisabledByAuthor": false
        })
    }
}

#[async_trait]
impl PlatformAdapter for LinkedinAdapter {
    fn platform(&self) -> Platform {
        Platform::Linkedin
    }

    fn validate(&self, content: &ContentSnapshot) -> Result<(), PublishError> {
        check_length(Platform::Linkedin, &Self::commentary(content), CHARACTER_LIMIT)
    }

    async fn publish(
        &self,
        content: &ContentSnapshot,
        credentials: &ConnectionCredentials,
        idempotency_key: &IdempotencyKey,
    ) -> PublishResult {
        let author = http::account_ref(Platform::Linkedin, credentials)?;
        let url = format!("{}/rest/posts", self.base_url.trim_end_matches('/'));

        let request = self
            .client
            .post(&url)
            .header("LinkedIn-Version", API_VERSION)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&Self::payload(author, content));
        let request = http::with_idempotency(http::bearer(request, credentials), idempotency_key);

        let response = request
            .send()
            .await
            .map_err(|e| http::transport_error(Platform::Linkedin, e))?;

        // 201 Created carries the post URN in a header and an empty body
        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = http::read_json(Platform::Linkedin, response).await?;

        match header_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => http::required_str(Platform::Linkedin, &body, "/id"),
        }
    }
}
