//! Publish executor
//!
//! Runs one attempt for a claimed post: a heartbeat on the claim, adapter
//! lookup, credential fetch, content validation, the adapter call under a
//! hard timeout, exactly one publishing log entry, then the outcome write.
//! Retries are not looped here; a transient failure puts the post back to
//! `pending` with a later `scheduled_at` and the dispatcher picks it up
//! again when it comes due.

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::audit::{append_best_effort, PublishingLog};
use crate::connections::{ConnectionCredentials, ConnectionDirectory};
use crate::error::{PublishError, Result, SchedcastError};
use crate::platforms::{AdapterRegistry, PlatformAdapter};
use crate::store::ScheduledPostStore;
use crate::types::{IdempotencyKey, LogStatus, Outcome, PublishingLogEntry, ScheduledPost};

/// Unix-second time source for attempt bookkeeping
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Reads `base` now and advances with the monotonic clock from here on.
pub fn anchored_clock(base: i64) -> Clock {
    let anchor = Instant::now();
    Arc::new(move || base + i64::try_from(anchor.elapsed().as_secs()).unwrap_or(0))
}

/// What happened to one claimed post
#[derive(Debug, Clone)]
pub struct Execution {
    pub post_id: String,
    pub outcome: Outcome,
    /// Post state after the outcome write; `None` if the claim had been lost
    pub post: Option<ScheduledPost>,
    /// Whether the publishing log entry was written
    pub logged: bool,
}

#[derive(Clone)]
pub struct PublishExecutor {
    adapters: AdapterRegistry,
    connections: Arc<dyn ConnectionDirectory>,
    store: ScheduledPostStore,
    log: Arc<dyn PublishingLog>,
    timeout: Duration,
}

impl PublishExecutor {
    pub fn new(
        adapters: AdapterRegistry,
        connections: Arc<dyn ConnectionDirectory>,
        store: ScheduledPostStore,
        log: Arc<dyn PublishingLog>,
        timeout: Duration,
    ) -> Self {
        Self {
            adapters,
            connections,
            store,
            log,
            timeout,
        }
    }

    pub fn store(&self) -> &ScheduledPostStore {
        &self.store
    }

    /// Run one attempt for a claimed post.
    ///
    /// The post must be the value returned by a successful claim: its
    /// `version` gates both the pre-publish heartbeat and the outcome write.
    /// Returns `None` without calling the platform if the claim has been
    /// superseded. `clock` is read when the attempt starts and again when it
    /// finishes.
    pub async fn execute(&self, post: ScheduledPost, clock: &Clock) -> Result<Option<Execution>> {
        let key = post.idempotency_key();
        let attempt = post.attempts + 1;

        if !self.store.touch_claim(&post.id, post.version, clock()).await? {
            warn!(
                post_id = %post.id,
                version = post.version,
                "Claim superseded before publishing, skipping"
            );
            return Ok(None);
        }

        debug!(
            post_id = %post.id,
            platform = %post.platform,
            attempt,
            "Publishing"
        );
        let outcome = self.attempt(&post, &key).await;
        let finished_at = clock();
        let entry = log_entry(&post, attempt, &key, &outcome, finished_at);

        // Success is recorded before it is logged; failures are logged first
        // so the entry reflects the proximate cause even when the outcome
        // write turns the failure terminal.
        let (recorded, logged) = match outcome {
            Outcome::Success { .. } => {
                let recorded = self.record(&post, outcome.clone(), finished_at).await;
                let logged = append_best_effort(self.log.as_ref(), &entry).await;
                (recorded, logged)
            }
            _ => {
                let logged = append_best_effort(self.log.as_ref(), &entry).await;
                let recorded = self.record(&post, outcome.clone(), finished_at).await;
                (recorded, logged)
            }
        };

        Ok(Some(Execution {
            post_id: post.id,
            outcome,
            post: recorded?,
            logged,
        }))
    }

    async fn attempt(&self, post: &ScheduledPost, key: &IdempotencyKey) -> Outcome {
        let adapter = match self.adapters.get(post.platform) {
            Some(adapter) => adapter,
            None => {
                return Outcome::PermanentFailure(PublishError::permanent(format!(
                    "No adapter registered for {}",
                    post.platform
                )))
            }
        };

        let credentials = match self.credentials(post).await {
            Ok(credentials) => credentials,
            Err(e) => return classify(e),
        };

        if let Err(e) = adapter.validate(&post.content) {
            return classify(e);
        }

        self.call(adapter.as_ref(), post, &credentials, key).await
    }

    async fn credentials(
        &self,
        post: &ScheduledPost,
    ) -> std::result::Result<ConnectionCredentials, PublishError> {
        let connection = self
            .connections
            .lookup(&post.platform_connection_id)
            .await
            .map_err(|e| PublishError::transient(format!("Connection lookup failed: {}", e)))?
            .ok_or_else(|| {
                PublishError::permanent(format!(
                    "Platform connection {} no longer exists",
                    post.platform_connection_id
                ))
            })?;

        if !connection.is_active {
            return Err(PublishError::permanent(format!(
                "Platform connection {} ({}) is inactive",
                connection.id, connection.account_name
            )));
        }
        self.connections.credentials(&connection).await
    }

    async fn call(
        &self,
        adapter: &dyn PlatformAdapter,
        post: &ScheduledPost,
        credentials: &ConnectionCredentials,
        key: &IdempotencyKey,
    ) -> Outcome {
        let publish = adapter.publish(&post.content, credentials, key);
        match tokio::time::timeout(self.timeout, publish).await {
            Ok(Ok(external_ref)) => Outcome::Success { external_ref },
            Ok(Err(e)) => classify(e),
            Err(_) => Outcome::TransientFailure(PublishError::transient(format!(
                "{} publish timed out after {}s",
                post.platform,
                self.timeout.as_secs_f64()
            ))),
        }
    }

    async fn record(
        &self,
        post: &ScheduledPost,
        outcome: Outcome,
        now: i64,
    ) -> Result<Option<ScheduledPost>> {
        match self
            .store
            .record_outcome(&post.id, post.version, outcome, now)
            .await
        {
            Ok(updated) => {
                info!(
                    post_id = %updated.id,
                    platform = %updated.platform,
                    status = %updated.status,
                    attempts = updated.attempts,
                    "Attempt finished"
                );
                Ok(Some(updated))
            }
            Err(SchedcastError::StateConflict { id, status }) => {
                warn!(
                    post_id = %id,
                    current_status = %status,
                    "Claim lost before the outcome was recorded"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn classify(error: PublishError) -> Outcome {
    if error.is_transient() {
        Outcome::TransientFailure(error)
    } else {
        Outcome::PermanentFailure(error)
    }
}

fn log_entry(
    post: &ScheduledPost,
    attempt: u32,
    key: &IdempotencyKey,
    outcome: &Outcome,
    created_at: i64,
) -> PublishingLogEntry {
    let (status, message, details) = match outcome {
        Outcome::Success { external_ref } => (
            LogStatus::Success,
            format!("Published to {}", post.platform),
            json!({
                "attempt": attempt,
                "external_ref": external_ref,
                "idempotency_key": key,
            }),
        ),
        Outcome::TransientFailure(e) | Outcome::PermanentFailure(e) => (
            LogStatus::Failure,
            e.message.clone(),
            json!({
                "attempt": attempt,
                "kind": e.kind,
                "code": e.code,
                "idempotency_key": key,
            }),
        ),
    };

    PublishingLogEntry {
        id: None,
        scheduled_post_id: post.id.clone(),
        platform: post.platform,
        status,
        message,
        details,
        created_at,
    }
}
