//! Mock platform adapter for testing
//!
//! Plays back a script of outcomes, records every call and keeps an
//! "external ledger" of posts that reached the platform, deduplicated by
//! idempotency key the way a well-behaved platform would. No network access
//! or credentials needed.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use super::{check_length, PlatformAdapter, PublishResult};
use crate::connections::ConnectionCredentials;
use crate::error::PublishError;
use crate::types::{ContentSnapshot, IdempotencyKey, Platform};

/// What the mock does on one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    Succeed,
    /// Fail transiently with the given upstream status
    Transient(u16),
    /// Fail permanently with the given upstream status
    Permanent(u16),
    /// The post lands on the platform, then the response never arrives
    LoseResponse,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<MockBehavior>,
    calls: usize,
    keys: Vec<IdempotencyKey>,
    contents: Vec<ContentSnapshot>,
    ledger: HashMap<IdempotencyKey, String>,
}

pub struct MockAdapter {
    platform: Platform,
    fallback: MockBehavior,
    delay: Duration,
    lost_response_hang: Duration,
    character_limit: Option<usize>,
    state: Mutex<MockState>,
}

impl MockAdapter {
    /// A mock that plays `script` in order, then repeats `fallback` forever.
    pub fn new(platform: Platform, script: Vec<MockBehavior>, fallback: MockBehavior) -> Self {
        Self {
            platform,
            fallback,
            delay: Duration::ZERO,
            lost_response_hang: Duration::from_secs(3600),
            character_limit: None,
            state: Mutex::new(MockState {
                script: script.into(),
                ..Default::default()
            }),
        }
    }

    /// Always succeeds
    pub fn success(platform: Platform) -> Self {
        Self::new(platform, Vec::new(), MockBehavior::Succeed)
    }

    /// Plays `script`, then succeeds
    pub fn scripted(platform: Platform, script: Vec<MockBehavior>) -> Self {
        Self::new(platform, script, MockBehavior::Succeed)
    }

    /// Repeats `behavior` on every call
    pub fn always(platform: Platform, behavior: MockBehavior) -> Self {
        Self::new(platform, Vec::new(), behavior)
    }

    /// Simulated network latency on every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// How long a [`MockBehavior::LoseResponse`] call hangs
    pub fn with_lost_response_hang(mut self, hang: Duration) -> Self {
        self.lost_response_hang = hang;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.character_limit = Some(limit);
        self
    }

    pub fn call_count(&self) -> usize {
        self.state().calls
    }

    /// Idempotency keys in call order
    pub fn keys_seen(&self) -> Vec<IdempotencyKey> {
        self.state().keys.clone()
    }

    pub fn contents_seen(&self) -> Vec<ContentSnapshot> {
        self.state().contents.clone()
    }

    /// Number of distinct posts that exist on the "platform"
    pub fn external_post_count(&self) -> usize {
        self.state().ledger.len()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_behavior(&self, key: &IdempotencyKey, content: &ContentSnapshot) -> MockBehavior {
        let mut state = self.state();
        state.calls += 1;
        state.keys.push(key.clone());
        state.contents.push(content.clone());
        state.script.pop_front().unwrap_or_else(|| self.fallback.clone())
    }

    /// Create (or find) the external post for `key`.
    fn land(&self, key: &IdempotencyKey) -> String {
        let mut state = self.state();
        let next_id = state.ledger.len() + 1;
        let platform = self.platform;
        state
            .ledger
            .entry(key.clone())
            .or_insert_with(|| format!("mock-{}-{}", platform, next_id))
            .clone()
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn validate(&self, content: &ContentSnapshot) -> Result<(), PublishError> {
        match self.character_limit {
            Some(limit) => check_length(self.platform, &content.as_text(), limit),
            None => Ok(()),
        }
    }

    async fn publish(
        &self,
        content: &ContentSnapshot,
        _credentials: &ConnectionCredentials,
        idempotency_key: &IdempotencyKey,
    ) -> PublishResult {
        let behavior = self.next_behavior(idempotency_key, content);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match behavior {
            MockBehavior::Succeed => Ok(self.land(idempotency_key)),
            MockBehavior::Transient(code) => Err(PublishError::transient(format!(
                "mock {} unavailable ({})",
                self.platform, code
            ))
            .with_code(code)),
            MockBehavior::Permanent(code) => Err(PublishError::permanent(format!(
                "mock {} rejected the post ({})",
                self.platform, code
            ))
            .with_code(code)),
            MockBehavior::LoseResponse => {
                self.land(idempotency_key);
                sleep(self.lost_response_hang).await;
                Err(PublishError::transient(format!(
                    "mock {} response lost",
                    self.platform
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn creds() -> ConnectionCredentials {
        ConnectionCredentials {
            connection_id: "c1".to_string(),
            account_ref: None,
            token: SecretString::from("t".to_string()),
        }
    }

    fn content() -> ContentSnapshot {
        ContentSnapshot {
            body: "hello".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let mock = MockAdapter::scripted(
            Platform::Twitter,
            vec![MockBehavior::Transient(503), MockBehavior::Permanent(401)],
        );
        let key = IdempotencyKey::for_post("p1");

        let first = mock.publish(&content(), &creds(), &key).await.unwrap_err();
        assert!(first.is_transient());
        assert_eq!(first.code, Some(503));

        let second = mock.publish(&content(), &creds(), &key).await.unwrap_err();
        assert!(!second.is_transient());

        let third = mock.publish(&content(), &creds(), &key).await.unwrap();
        assert_eq!(third, "mock-twitter-1");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_ledger_dedups_by_key() {
        let mock = MockAdapter::success(Platform::Facebook);
        let a = IdempotencyKey::for_post("a");
        let b = IdempotencyKey::for_post("b");

        let first = mock.publish(&content(), &creds(), &a).await.unwrap();
        let again = mock.publish(&content(), &creds(), &a).await.unwrap();
        let other = mock.publish(&content(), &creds(), &b).await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(mock.external_post_count(), 2);
        assert_eq!(mock.keys_seen(), vec![a.clone(), a, b]);
    }

    #[tokio::test]
    async fn test_lost_response_lands_anyway() {
        let mock = MockAdapter::scripted(Platform::Linkedin, vec![MockBehavior::LoseResponse])
            .with_lost_response_hang(Duration::from_millis(5));
        let key = IdempotencyKey::for_post("p1");

        assert!(mock.publish(&content(), &creds(), &key).await.is_err());
        assert_eq!(mock.external_post_count(), 1);

        mock.publish(&content(), &creds(), &key).await.unwrap();
        assert_eq!(mock.external_post_count(), 1);
    }

    #[test]
    fn test_limit() {
        let mock = MockAdapter::success(Platform::Twitter).with_limit(3);
        assert!(mock.validate(&content()).is_err());
    }
}
