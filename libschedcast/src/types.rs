//! Core types for Schedcast

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

use crate::error::PublishError;

/// Target platform of a scheduled post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Self-hosted WordPress site
    Website,
    Facebook,
    Twitter,
    Instagram,
    Linkedin,
    Tiktok,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Website,
        Platform::Facebook,
        Platform::Twitter,
        Platform::Instagram,
        Platform::Linkedin,
        Platform::Tiktok,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Website => "website",
            Platform::Facebook => "facebook",
            Platform::Twitter => "twitter",
            Platform::Instagram => "instagram",
            Platform::Linkedin => "linkedin",
            Platform::Tiktok => "tiktok",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "website" | "wordpress" => Ok(Platform::Website),
            "facebook" => Ok(Platform::Facebook),
            "twitter" | "x" => Ok(Platform::Twitter),
            "instagram" => Ok(Platform::Instagram),
            "linkedin" => Ok(Platform::Linkedin),
            "tiktok" => Ok(Platform::Tiktok),
            _ => Err(format!("Unknown platform: '{}'", s)),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a scheduled post.
///
/// `pending -> publishing -> published | pending (retry) | failed`, and
/// `pending -> cancelled`. Published, failed and cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostStatus::Published | PostStatus::Failed | PostStatus::Cancelled
        )
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PostStatus::Pending),
            "publishing" => Ok(PostStatus::Publishing),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" => Ok(PostStatus::Cancelled),
            _ => Err(format!("Unknown post status: '{}'", s)),
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Reference to a media object hosted elsewhere (the engine never uploads
/// raw bytes itself, platforms fetch by URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

/// Content captured when the post was scheduled. Never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentSnapshot {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

impl ContentSnapshot {
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.body.trim().is_empty() && self.media.is_empty()
    }

    /// Title and body joined the way short-form platforms display them.
    pub fn as_text(&self) -> String {
        match (self.title.trim(), self.body.trim()) {
            ("", body) => body.to_string(),
            (title, "") => title.to_string(),
            (title, body) => format!("{}\n\n{}", title, body),
        }
    }

    pub fn images(&self) -> impl Iterator<Item = &MediaRef> {
        self.media.iter().filter(|m| m.kind == MediaKind::Image)
    }

    pub fn videos(&self) -> impl Iterator<Item = &MediaRef> {
        self.media.iter().filter(|m| m.kind == MediaKind::Video)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub owner_id: String,
    pub platform_connection_id: String,
    pub platform: Platform,
    pub content: ContentSnapshot,
    /// Unix seconds
    pub scheduled_at: i64,
    pub status: PostStatus,
    pub attempts: u32,
    pub last_error: Option<PublishError>,
    /// Platform-side id once published
    pub external_ref: Option<String>,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScheduledPost {
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::for_post(&self.id)
    }
}

/// What the authoring collaborator hands over to schedule a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduledPost {
    pub owner_id: String,
    pub platform_connection_id: String,
    pub content: ContentSnapshot,
    pub scheduled_at: i64,
}

/// Stable per-post deduplication key handed to adapters.
///
/// Derived from the post id only, so every retry of the same post presents
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn for_post(post_id: &str) -> Self {
        let digest = Sha256::digest(format!("schedcast:post:{}", post_id).as_bytes());
        let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one adapter call, as handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { external_ref: String },
    TransientFailure(PublishError),
    PermanentFailure(PublishError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failure,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Failure => "failure",
        }
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LogStatus::Success),
            "failure" => Ok(LogStatus::Failure),
            _ => Err(format!("Unknown log status: '{}'", s)),
        }
    }
}

/// One row of the append-only publishing audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingLogEntry {
    pub id: Option<i64>,
    pub scheduled_post_id: String,
    pub platform: Platform,
    pub status: LogStatus,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: i64,
}
