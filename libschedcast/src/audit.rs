//! Publishing log: append-only record of every adapter attempt
//!
//! Log durability is best-effort relative to post state. Callers go through
//! [`append_best_effort`], which reports a failed write to diagnostics and
//! carries on.

use async_trait::async_trait;
use sqlx::Row;

use crate::db::Database;
use crate::error::{DbError, Result, SchedcastError};
use crate::types::PublishingLogEntry;

#[async_trait]
pub trait PublishingLog: Send + Sync {
    async fn append(&self, entry: &PublishingLogEntry) -> Result<()>;
}

/// Write `entry`, swallowing any failure after reporting it.
///
/// Returns whether the write succeeded.
pub async fn append_best_effort(log: &dyn PublishingLog, entry: &PublishingLogEntry) -> bool {
    match log.append(entry).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(
                target: "schedcast::audit",
                post_id = %entry.scheduled_post_id,
                platform = %entry.platform,
                status = entry.status.as_str(),
                error = %e,
                "Failed to write publishing log entry"
            );
            false
        }
    }
}

#[derive(Clone)]
pub struct SqlitePublishingLog {
    db: Database,
}

impl SqlitePublishingLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All entries for one post in the order they were written
    pub async fn for_post(&self, post_id: &str) -> Result<Vec<PublishingLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, scheduled_post_id, platform, status, message, details, created_at
            FROM publishing_logs
            WHERE scheduled_post_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(post_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                let platform: String = r.get("platform");
                let status: String = r.get("status");
                let details: String = r.get("details");
                Ok(PublishingLogEntry {
                    id: r.get("id"),
                    scheduled_post_id: r.get("scheduled_post_id"),
                    platform: platform.parse().map_err(corrupt)?,
                    status: status.parse().map_err(corrupt)?,
                    message: r.get("message"),
                    details: serde_json::from_str(&details)
                        .map_err(|e| corrupt(format!("details: {}", e)))?,
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl PublishingLog for SqlitePublishingLog {
    async fn append(&self, entry: &PublishingLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO publishing_logs (scheduled_post_id, platform, status, message, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.scheduled_post_id)
        .bind(entry.platform.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.message)
        .bind(entry.details.to_string())
        .bind(entry.created_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| SchedcastError::Logging(e.to_string()))?;

        Ok(())
    }
}

fn corrupt(reason: String) -> SchedcastError {
    DbError::Corrupt {
        table: "publishing_logs",
        reason,
    }
    .into()
}
