//! Scheduled post store
//!
//! Durable state for scheduled posts. Every state change is a single
//! conditional `UPDATE ... RETURNING` gated on the row's current status and,
//! for the dispatcher paths, its `version`. That conditional write is the
//! only thing standing between two dispatchers and a double publish, so
//! nothing here reads a row and then writes it unconditionally.
//!
//! Every recorded transition is announced through the
//! [`NotificationEmitter`].

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;

use crate::connections::ConnectionDirectory;
use crate::db::Database;
use crate::error::{DbError, PublishError, Result, SchedcastError};
use crate::notify::NotificationEmitter;
use crate::retry::{RetryPolicies, RetryPolicy, MAX_BACKOFF_EXPONENT};
use crate::types::{ContentSnapshot, NewScheduledPost, Outcome, Platform, PostStatus, ScheduledPost};

const POST_COLUMNS: &str = "id, owner_id, platform_connection_id, platform, content, scheduled_at, status, \
     attempts, last_error, external_ref, version, created_at, updated_at";

/// Result of trying to take exclusive processing rights on a post.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The caller now owns the post; `version` is the post-claim version to
    /// pass to [`ScheduledPostStore::record_outcome`].
    Claimed(ScheduledPost),
    /// Someone else got there first, or the post is no longer pending.
    Conflict,
}

#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub owner_id: Option<String>,
    pub status: Option<PostStatus>,
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

pub const MAX_PER_PAGE: u32 = 100;

#[derive(Clone)]
pub struct ScheduledPostStore {
    db: Database,
    connections: Arc<dyn ConnectionDirectory>,
    notifier: NotificationEmitter,
    policies: RetryPolicies,
    retry_sql: RetrySql,
}

impl ScheduledPostStore {
    pub fn new(
        db: Database,
        connections: Arc<dyn ConnectionDirectory>,
        notifier: NotificationEmitter,
        policies: RetryPolicies,
    ) -> Self {
        Self {
            retry_sql: RetrySql::new(&policies),
            db,
            connections,
            notifier,
            policies,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn policies(&self) -> &RetryPolicies {
        &self.policies
    }

    /// Insert a new pending post.
    ///
    /// The connection must exist, belong to `new.owner_id` and be active, and
    /// `scheduled_at` must lie strictly after `now`. The post's platform is
    /// taken from the connection.
    pub async fn create(&self, new: NewScheduledPost, now: i64) -> Result<ScheduledPost> {
        if new.content.is_empty() {
            return Err(SchedcastError::Validation(
                "Content snapshot cannot be empty".to_string(),
            ));
        }
        if new.scheduled_at <= now {
            return Err(SchedcastError::Validation(
                "scheduled_at must be in the future".to_string(),
            ));
        }

        let connection = self
            .connections
            .lookup(&new.platform_connection_id)
            .await?
            .filter(|c| c.owner_id == new.owner_id)
            .ok_or_else(|| {
                SchedcastError::Validation(format!(
                    "Unknown platform connection: {}",
                    new.platform_connection_id
                ))
            })?;

        if !connection.is_active {
            return Err(SchedcastError::Validation(format!(
                "Platform connection {} is not active",
                connection.id
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let content = encode_content(&new.content)?;

        let sql = format!(
            "INSERT INTO scheduled_posts
                 (id, owner_id, platform_connection_id, platform, content, scheduled_at,
                  status, attempts, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, 0, ?, ?)
             RETURNING {}",
            POST_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&id)
            .bind(&new.owner_id)
            .bind(&connection.id)
            .bind(connection.platform.as_str())
            .bind(content)
            .bind(new.scheduled_at)
            .bind(now)
            .bind(now)
            .fetch_one(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        let post = post_from_row(&row)?;
        tracing::info!(
            post_id = %post.id,
            owner_id = %post.owner_id,
            platform = %post.platform,
            scheduled_at = post.scheduled_at,
            "Scheduled post created"
        );
        self.notifier.emit_post(&post);
        Ok(post)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ScheduledPost>> {
        let sql = format!("SELECT {} FROM scheduled_posts WHERE id = ?", POST_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        row.as_ref().map(post_from_row).transpose()
    }

    /// Fetch a post visible to `owner_id`. Someone else's post is reported
    /// as missing.
    pub async fn get_owned(&self, id: &str, owner_id: &str) -> Result<ScheduledPost> {
        self.get(id)
            .await?
            .filter(|post| post.owner_id == owner_id)
            .ok_or_else(|| SchedcastError::NotFound(format!("scheduled post {}", id)))
    }

    pub async fn list(&self, filter: &PostFilter, page: u32, per_page: u32) -> Result<Page<ScheduledPost>> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PER_PAGE);

        let mut where_clauses = vec!["1=1"];
        if filter.owner_id.is_some() {
            where_clauses.push("owner_id = ?");
        }
        if filter.status.is_some() {
            where_clauses.push("status = ?");
        }
        if filter.platform.is_some() {
            where_clauses.push("platform = ?");
        }
        let where_clause = where_clauses.join(" AND ");

        let count_sql = format!("SELECT COUNT(*) FROM scheduled_posts WHERE {}", where_clause);
        let list_sql = format!(
            "SELECT {} FROM scheduled_posts WHERE {} ORDER BY scheduled_at DESC, id LIMIT ? OFFSET ?",
            POST_COLUMNS, where_clause
        );

        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        let mut list_query = sqlx::query(&list_sql);

        // Bind parameters in the same order as the WHERE clauses
        if let Some(owner) = &filter.owner_id {
            count_query = count_query.bind(owner);
            list_query = list_query.bind(owner);
        }
        if let Some(status) = filter.status {
            count_query = count_query.bind(status.as_str());
            list_query = list_query.bind(status.as_str());
        }
        if let Some(platform) = filter.platform {
            count_query = count_query.bind(platform.as_str());
            list_query = list_query.bind(platform.as_str());
        }
        let offset = i64::from(page - 1) * i64::from(per_page);
        list_query = list_query.bind(i64::from(per_page)).bind(offset);

        let (total,) = count_query
            .fetch_one(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        let rows = list_query
            .fetch_all(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(Page {
            items: rows.iter().map(post_from_row).collect::<Result<_>>()?,
            page,
            per_page,
            total: total.max(0) as u64,
        })
    }

    /// Pending posts with `scheduled_at <= now`, oldest first, at most
    /// `limit` of them.
    pub async fn list_due(&self, now: i64, limit: u32) -> Result<Vec<ScheduledPost>> {
        let sql = format!(
            "SELECT {} FROM scheduled_posts
             WHERE status = 'pending' AND scheduled_at <= ?
             ORDER BY scheduled_at ASC, created_at ASC, id ASC
             LIMIT ?",
            POST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        rows.iter().map(post_from_row).collect()
    }

    /// Move a pending post to `publishing` if, and only if, it still has
    /// `expected_version`.
    pub async fn claim(&self, id: &str, expected_version: i64, now: i64) -> Result<ClaimOutcome> {
        let sql = format!(
            "UPDATE scheduled_posts
             SET status = 'publishing', version = version + 1, updated_at = ?
             WHERE id = ? AND status = 'pending' AND version = ?
             RETURNING {}",
            POST_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(now)
            .bind(id)
            .bind(expected_version)
            .fetch_optional(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        match row {
            Some(row) => {
                let post = post_from_row(&row)?;
                tracing::debug!(post_id = %post.id, version = post.version, "Post claimed");
                self.notifier.emit_post(&post);
                Ok(ClaimOutcome::Claimed(post))
            }
            None => {
                tracing::debug!(post_id = %id, expected_version, "Claim lost");
                Ok(ClaimOutcome::Conflict)
            }
        }
    }

    /// Refresh the `updated_at` of a live claim right before the platform
    /// call, so the recovery sweep measures staleness from the attempt
    /// rather than from the claim.
    ///
    /// Returns `false` if the claim has been superseded, in which case the
    /// caller must not publish.
    pub async fn touch_claim(&self, id: &str, version: i64, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE scheduled_posts SET updated_at = ?
             WHERE id = ? AND status = 'publishing' AND version = ?",
        )
        .bind(now)
        .bind(id)
        .bind(version)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;
        Ok(result.rows_affected() == 1)
    }

    /// Apply the result of a publish attempt to a claimed post.
    ///
    /// - success: `published`, `external_ref` stored, attempts unchanged
    /// - transient failure with retries left: back to `pending`,
    ///   `attempts + 1`, `scheduled_at = now + backoff(attempts + 1)`
    /// - transient failure with retries exhausted, or permanent failure:
    ///   `failed`, `attempts + 1`, `last_error` set
    ///
    /// Each case is one conditional write; attempts and the retry policy are
    /// evaluated against the row inside the statement. Fails with
    /// `StateConflict` if the claim was lost in the meantime (for example to
    /// the recovery sweep).
    pub async fn record_outcome(
        &self,
        id: &str,
        expected_version: i64,
        outcome: Outcome,
        now: i64,
    ) -> Result<ScheduledPost> {
        let row = match outcome {
            Outcome::Success { external_ref } => {
                let sql = format!(
                    "UPDATE scheduled_posts
                     SET status = 'published', external_ref = ?, last_error = NULL,
                         version = version + 1, updated_at = ?
                     WHERE id = ? AND status = 'publishing' AND version = ?
                     RETURNING {}",
                    POST_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(external_ref)
                    .bind(now)
                    .bind(id)
                    .bind(expected_version)
                    .fetch_optional(self.db.pool())
                    .await
            }
            Outcome::TransientFailure(error) => {
                let sql = format!(
                    "UPDATE scheduled_posts
                     SET status = CASE WHEN attempts + 1 < {max} THEN 'pending' ELSE 'failed' END,
                         scheduled_at = CASE WHEN attempts + 1 < {max}
                             THEN ? + {backoff} ELSE scheduled_at END,
                         attempts = MIN(attempts + 1, {max}),
                         last_error = ?, version = version + 1, updated_at = ?
                     WHERE id = ? AND status = 'publishing' AND version = ?
                     RETURNING {columns}",
                    max = self.retry_sql.max_attempts,
                    backoff = self.retry_sql.next_backoff,
                    columns = POST_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(now)
                    .bind(encode_error(&error)?)
                    .bind(now)
                    .bind(id)
                    .bind(expected_version)
                    .fetch_optional(self.db.pool())
                    .await
            }
            Outcome::PermanentFailure(error) => {
                let sql = format!(
                    "UPDATE scheduled_posts
                     SET status = 'failed', attempts = MIN(attempts + 1, {max}), last_error = ?,
                         version = version + 1, updated_at = ?
                     WHERE id = ? AND status = 'publishing' AND version = ?
                     RETURNING {columns}",
                    max = self.retry_sql.max_attempts,
                    columns = POST_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(encode_error(&error)?)
                    .bind(now)
                    .bind(id)
                    .bind(expected_version)
                    .fetch_optional(self.db.pool())
                    .await
            }
        }
        .map_err(DbError::SqlxError)?;

        let row = match row {
            Some(row) => row,
            None => {
                let current = self
                    .get(id)
                    .await?
                    .ok_or_else(|| SchedcastError::NotFound(format!("scheduled post {}", id)))?;
                return Err(SchedcastError::StateConflict {
                    id: id.to_string(),
                    status: current.status,
                });
            }
        };
        let post = post_from_row(&row)?;
        tracing::info!(
            post_id = %post.id,
            status = %post.status,
            attempts = post.attempts,
            "Publish outcome recorded"
        );
        self.notifier.emit_post(&post);
        Ok(post)
    }

    /// User cancel. Only a pending post can be cancelled.
    pub async fn cancel(&self, id: &str, owner_id: &str, now: i64) -> Result<ScheduledPost> {
        let sql = format!(
            "UPDATE scheduled_posts
             SET status = 'cancelled', version = version + 1, updated_at = ?
             WHERE id = ? AND owner_id = ? AND status = 'pending'
             RETURNING {}",
            POST_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(now)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        let post = match row {
            Some(row) => post_from_row(&row)?,
            None => return Err(self.explain_miss(id, owner_id).await),
        };
        tracing::info!(post_id = %post.id, "Scheduled post cancelled");
        self.notifier.emit_post(&post);
        Ok(post)
    }

    /// Move a pending post to a new time, optionally replacing its content
    /// snapshot.
    pub async fn reschedule(
        &self,
        id: &str,
        owner_id: &str,
        scheduled_at: i64,
        content: Option<ContentSnapshot>,
        now: i64,
    ) -> Result<ScheduledPost> {
        if scheduled_at <= now {
            return Err(SchedcastError::Validation(
                "scheduled_at must be in the future".to_string(),
            ));
        }
        if content.as_ref().is_some_and(|c| c.is_empty()) {
            return Err(SchedcastError::Validation(
                "Content snapshot cannot be empty".to_string(),
            ));
        }
        let content = content.as_ref().map(encode_content).transpose()?;

        let sql = format!(
            "UPDATE scheduled_posts
             SET scheduled_at = ?, content = COALESCE(?, content),
                 version = version + 1, updated_at = ?
             WHERE id = ? AND owner_id = ? AND status = 'pending'
             RETURNING {}",
            POST_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(scheduled_at)
            .bind(content)
            .bind(now)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        match row {
            Some(row) => {
                let post = post_from_row(&row)?;
                tracing::info!(post_id = %post.id, scheduled_at, "Scheduled post rescheduled");
                Ok(post)
            }
            None => Err(self.explain_miss(id, owner_id).await),
        }
    }

    /// Return posts stuck in `publishing` since before `now - stale_after`
    /// to `pending` (due immediately), counting the lost attempt. A post
    /// whose lost attempt was its last goes to `failed` instead.
    pub async fn requeue_stale(&self, now: i64, stale_after: Duration) -> Result<Vec<ScheduledPost>> {
        let cutoff = now - delay_secs(stale_after);
        let error = PublishError::transient("Publish attempt abandoned before completion");
        let sql = format!(
            "UPDATE scheduled_posts
             SET status = CASE WHEN attempts + 1 < {max} THEN 'pending' ELSE 'failed' END,
                 scheduled_at = CASE WHEN attempts + 1 < {max} THEN ? ELSE scheduled_at END,
                 attempts = MIN(attempts + 1, {max}),
                 last_error = ?, version = version + 1, updated_at = ?
             WHERE status = 'publishing' AND updated_at <= ?
             RETURNING {columns}",
            max = self.retry_sql.max_attempts,
            columns = POST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(encode_error(&error)?)
            .bind(now)
            .bind(cutoff)
            .fetch_all(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        let mut requeued = Vec::with_capacity(rows.len());
        for row in &rows {
            let post = post_from_row(row)?;
            tracing::warn!(
                post_id = %post.id,
                status = %post.status,
                attempts = post.attempts,
                "Requeued stale publishing claim"
            );
            self.notifier.emit_post(&post);
            requeued.push(post);
        }
        Ok(requeued)
    }

    async fn explain_miss(&self, id: &str, owner_id: &str) -> SchedcastError {
        match self.get_owned(id, owner_id).await {
            Ok(post) => SchedcastError::StateConflict {
                id: post.id,
                status: post.status,
            },
            Err(e) => e,
        }
    }
}

/// Retry policy rendered as SQL expressions over a `scheduled_posts` row,
/// picking the per-platform policy with `CASE platform`.
#[derive(Debug, Clone)]
struct RetrySql {
    max_attempts: String,
    /// `backoff(attempts + 1)` in seconds
    next_backoff: String,
}

impl RetrySql {
    fn new(policies: &RetryPolicies) -> Self {
        Self {
            max_attempts: per_platform(policies, |policy| policy.max_attempts.to_string()),
            next_backoff: per_platform(policies, |policy| {
                format!(
                    "MIN({} * (1 << MIN(attempts + 1, {})), {})",
                    delay_secs(policy.base_delay),
                    MAX_BACKOFF_EXPONENT,
                    delay_secs(policy.max_delay)
                )
            }),
        }
    }
}

fn per_platform(policies: &RetryPolicies, value: impl Fn(&RetryPolicy) -> String) -> String {
    let arms: String = Platform::ALL
        .iter()
        .map(|platform| {
            format!(
                " WHEN '{}' THEN {}",
                platform.as_str(),
                value(&policies.for_platform(*platform))
            )
        })
        .collect();
    format!(
        "(CASE platform{} ELSE {} END)",
        arms,
        value(&policies.default_policy())
    )
}

fn delay_secs(delay: Duration) -> i64 {
    i64::try_from(delay.as_secs()).unwrap_or(i64::MAX / 2)
}

fn encode_content(content: &ContentSnapshot) -> Result<String> {
    serde_json::to_string(content).map_err(|e| {
        SchedcastError::Validation(format!("Content snapshot is not serializable: {}", e))
    })
}

fn encode_error(error: &PublishError) -> Result<String> {
    serde_json::to_string(error).map_err(|e| {
        SchedcastError::Database(DbError::Corrupt {
            table: "scheduled_posts",
            reason: format!("unserializable last_error: {}", e),
        })
    })
}

fn corrupt(reason: String) -> SchedcastError {
    DbError::Corrupt {
        table: "scheduled_posts",
        reason,
    }
    .into()
}

fn post_from_row(row: &SqliteRow) -> Result<ScheduledPost> {
    let platform: String = row.get("platform");
    let status: String = row.get("status");
    let content: String = row.get("content");
    let last_error: Option<String> = row.get("last_error");
    let attempts: i64 = row.get("attempts");

    Ok(ScheduledPost {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        platform_connection_id: row.get("platform_connection_id"),
        platform: platform.parse().map_err(corrupt)?,
        content: serde_json::from_str(&content).map_err(|e| corrupt(format!("content: {}", e)))?,
        scheduled_at: row.get("scheduled_at"),
        status: status.parse().map_err(corrupt)?,
        attempts: u32::try_from(attempts).map_err(|_| corrupt(format!("attempts: {}", attempts)))?,
        last_error: last_error
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| corrupt(format!("last_error: {}", e)))?,
        external_ref: row.get("external_ref"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
