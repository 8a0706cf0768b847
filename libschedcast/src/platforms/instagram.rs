//! Instagram Business adapter (Graph API content publishing)
//!
//! Publishing is two calls: create a media container from a hosted URL,
//! then publish the container.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::facebook::send_graph;
use super::http;
use super::{check_length, PlatformAdapter, PublishResult};
use crate::connections::ConnectionCredentials;
use crate::error::PublishError;
use crate::types::{ContentSnapshot, IdempotencyKey, MediaKind, Platform};

pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v19.0";
pub const CAPTION_LIMIT: usize = 2_200;

/// Container still processing; the publish call can be retried
const MEDIA_NOT_READY: i64 = 9007;

pub struct InstagramAdapter {
    client: Client,
    base_url: String,
}

impl InstagramAdapter {
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn validate(&self, content: &ContentSnapshot) -> Result<(), PublishError> {
        if content.media.is_empty() {
            return Err(PublishError::permanent(
                "Instagram posts require an image or video",
            ));
        }
        check_length(Platform::Instagram, &content.as_text(), CAPTION_LIMIT)
    }

    async fn publish(
        &self,
        content: &ContentSnapshot,
        credentials: &ConnectionCredentials,
        idempotency_key: &IdempotencyKey,
    ) -> PublishResult {
        let user_id = http::account_ref(Platform::Instagram, credentials)?;
        let base = self.base_url.trim_end_matches('/');
        let media = content.media.first().ok_or_else(|| {
            PublishError::permanent("Instagram posts require an image or video")
        })?;

        let container = match media.kind {
            MediaKind::Image => json!({ "image_url": media.url, "caption": content.as_text() }),
            MediaKind::Video => json!({
                "media_type": "REELS",
                "video_url": media.url,
                "caption": content.as_text(),
            }),
        };
        let request = self
            .client
            .post(format!("{}/{}/media", base, user_id))
            .json(&container);
        let request = http::with_idempotency(http::bearer(request, credentials), idempotency_key);
        let created = send_graph(Platform::Instagram, request, &[]).await?;
        let creation_id = http::required_str(Platform::Instagram, &created, "/id")?;

        let request = self
            .client
            .post(format!("{}/{}/media_publish", base, user_id))
            .json(&json!({ "creation_id": creation_id }));
        let request = http::with_idempotency(http::bearer(request, credentials), idempotency_key);
        let published = send_graph(Platform::Instagram, request, &[MEDIA_NOT_READY]).await?;
        http::required_str(Platform::Instagram, &published, "/id")
    }
}
