//! WordPress website adapter (REST API with application passwords)
//!
//! WordPress has no idempotency header, so the post slug carries the
//! idempotency key. Before creating, the adapter looks the slug up and
//! returns the existing post if an earlier attempt already landed.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::{json, Value};

use super::http;
use super::{PlatformAdapter, PublishResult};
use crate::connections::ConnectionCredentials;
use crate::error::PublishError;
use crate::types::{ContentSnapshot, IdempotencyKey, Platform};

pub struct WebsiteAdapter {
    client: Client,
    base_url: Option<String>,
}

impl WebsiteAdapter {
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self { client, base_url }
    }

    pub fn slug(key: &IdempotencyKey) -> String {
        format!("schedcast-{}", key)
    }

    /// Post HTML: body paragraphs followed by any images.
    pub fn render_html(content: &ContentSnapshot) -> String {
        let mut html: String = content
            .body
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| format!("<p>{}</p>", escape(p)))
            .collect::<Vec<_>>()
            .join("\n");
        for image in content.images() {
            let alt = image.alt_text.as_deref().unwrap_or("");
            html.push_str(&format!(
                "\n<img src=\"{}\" alt=\"{}\" />",
                escape(&image.url),
                escape(alt)
            ));
        }
        html
    }

    fn site<'a>(&'a self, credentials: &'a ConnectionCredentials) -> Result<&'a str, PublishError> {
        credentials
            .account_ref
            .as_deref()
            .or(self.base_url.as_deref())
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_end_matches('/'))
            .ok_or_else(|| {
                PublishError::permanent(format!(
                    "website connection {} has no site URL",
                    credentials.connection_id
                ))
            })
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        credentials: &ConnectionCredentials,
    ) -> Result<reqwest::RequestBuilder, PublishError> {
        let token = credentials.token.expose_secret();
        let (user, password) = token.split_once(':').ok_or_else(|| {
            PublishError::permanent("website credential must be 'username:application-password'")
        })?;
        Ok(request.basic_auth(user, Some(password)))
    }

    async fn find_existing(
        &self,
        endpoint: &str,
        slug: &str,
        credentials: &ConnectionCredentials,
    ) -> Result<Option<String>, PublishError> {
        let request = self
            .client
            .get(endpoint)
            .query(&[("slug", slug), ("status", "publish,future,draft,pending,private")]);
        let body = http::send_json(Platform::Website, self.authorize(request, credentials)?).await?;
        match body.as_array().and_then(|posts| posts.first()) {
            Some(post) => http::required_str(Platform::Website, post, "/id").map(Some),
            None => Ok(None),
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl PlatformAdapter for WebsiteAdapter {
    fn platform(&self) -> Platform {
        Platform::Website
    }

    fn validate(&self, content: &ContentSnapshot) -> Result<(), PublishError> {
        if content.title.trim().is_empty() {
            return Err(PublishError::permanent("Website posts require a title"));
        }
        Ok(())
    }

    async fn publish(
        &self,
        content: &ContentSnapshot,
        credentials: &ConnectionCredentials,
        idempotency_key: &IdempotencyKey,
    ) -> PublishResult {
        let endpoint = format!("{}/wp-json/wp/v2/posts", self.site(credentials)?);
        let slug = Self::slug(idempotency_key);

        if let Some(existing) = self.find_existing(&endpoint, &slug, credentials).await? {
            tracing::info!(
                target: "schedcast::platforms::website",
                slug = %slug,
                wordpress_id = %existing,
                "Post already exists, skipping create"
            );
            return Ok(existing);
        }

        let payload: Value = json!({
            "title": content.title,
            "content": Self::render_html(content),
            "status": "publish",
            "slug": slug,
        });
        let request = self.client.post(&endpoint).json(&payload);
        let body = http::send_json(Platform::Website, self.authorize(request, credentials)?).await?;
        http::required_str(Platform::Website, &body, "/id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaKind, MediaRef};

    #[test]
    fn test_render_html() {
        let content = ContentSnapshot {
            title: "Release notes".to_string(),
            body: "First <b>paragraph</b>.\n\nSecond one.".to_string(),
            media: vec![MediaRef {
                url: "https://cdn.example.com/hero.jpg".to_string(),
                kind: MediaKind::Image,
                alt_text: Some("Hero".to_string()),
            }],
        };
        assert_eq!(
            WebsiteAdapter::render_html(&content),
            "<p>First &lt;b&gt;paragraph&lt;/b&gt;.</p>\n<p>Second one.</p>\n<img src=\"https://cdn.example.com/hero.jpg\" alt=\"Hero\" />"
        );
    }

    #[test]
    fn test_slug_is_derived_from_key() {
        let key = IdempotencyKey::for_post("post-1");
        assert_eq!(WebsiteAdapter::slug(&key), format!("schedcast-{}", key.as_str()));
        assert_eq!(WebsiteAdapter::slug(&key), WebsiteAdapter::slug(&IdempotencyKey::for_post("post-1")));
    }

    #[test]
    fn test_title_required() {
        let adapter = WebsiteAdapter::new(Client::new(), None);
        let untitled = ContentSnapshot {
            body: "Body only".to_string(),
            ..Default::default()
        };
        assert!(adapter.validate(&untitled).is_err());
    }
}
