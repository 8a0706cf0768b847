//! Platform adapters and the registry that selects them
//!
//! Each adapter maps a [`ContentSnapshot`] onto one platform's wire format,
//! authenticates with the connection's credential and classifies every
//! failure as transient or permanent. The registry is keyed by the
//! [`Platform`] enum; [`AdapterRegistry::from_config`] matches exhaustively
//! over it, so adding a platform without an adapter does not compile.
//!
//! # Examples
//!
//! ```no_run
//! use libschedcast::platforms::AdapterRegistry;
//! use libschedcast::types::Platform;
//! use libschedcast::Config;
//!
//! # fn example() -> libschedcast::Result<()> {
//! let config = Config::load()?;
//! let registry = AdapterRegistry::from_config(&config)?;
//! assert!(registry.get(Platform::Facebook).is_some());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::connections::ConnectionCredentials;
use crate::error::{PublishError, Result};
use crate::types::{ContentSnapshot, IdempotencyKey, Platform};

pub mod facebook;
pub mod http;
pub mod instagram;
pub mod linkedin;
pub mod tiktok;
pub mod twitter;
pub mod website;

// Available outside tests too, for integration tests and local dry runs
pub mod mock;

/// Platform-side identifier of a published post, or the classified failure.
pub type PublishResult = std::result::Result<String, PublishError>;

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Check platform limits without any network I/O. Violations are
    /// permanent: retrying will not make the content shorter.
    fn validate(&self, _content: &ContentSnapshot) -> std::result::Result<(), PublishError> {
        Ok(())
    }

    /// Publish `content`. `idempotency_key` is the same on every retry of a
    /// post; adapters pass it on wherever the platform can deduplicate.
    async fn publish(
        &self,
        content: &ContentSnapshot,
        credentials: &ConnectionCredentials,
        idempotency_key: &IdempotencyKey,
    ) -> PublishResult;
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One HTTP adapter per platform, sharing a connection pool.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http::build_client(Duration::from_secs(config.publish.timeout_secs))?;
        let mut registry = Self::new();

        for platform in Platform::ALL {
            let base_url = config.base_url(platform).map(str::to_string);
            let adapter: Arc<dyn PlatformAdapter> = match platform {
                Platform::Website => Arc::new(website::WebsiteAdapter::new(client.clone(), base_url)),
                Platform::Facebook => Arc::new(facebook::FacebookAdapter::new(client.clone(), base_url)),
                Platform::Twitter => Arc::new(twitter::TwitterAdapter::new(client.clone(), base_url)),
                Platform::Instagram => {
                    Arc::new(instagram::InstagramAdapter::new(client.clone(), base_url))
                }
                Platform::Linkedin => Arc::new(linkedin::LinkedinAdapter::new(client.clone(), base_url)),
                Platform::Tiktok => Arc::new(tiktok::TiktokAdapter::new(client.clone(), base_url)),
            };
            registry.register(adapter);
        }

        Ok(registry)
    }

    /// Add or replace the adapter for its platform.
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

/// Characters as platforms count them (Unicode scalar values).
pub(crate) fn char_count(text: &str) -> usize {
    text.chars().count()
}

pub(crate) fn check_length(
    platform: Platform,
    text: &str,
    limit: usize,
) -> std::result::Result<(), PublishError> {
    let count = char_count(text);
    if count > limit {
        return Err(PublishError::permanent(format!(
            "Content exceeds {}'s {} character limit (current: {} characters)",
            platform, limit, count
        )));
    }
    Ok(())
}
