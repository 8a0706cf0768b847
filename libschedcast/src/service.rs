//! Service facade for Schedcast
//!
//! `SchedcastService` wires the store, publishing log, notification
//! registry, adapters and dispatcher together once, and exposes the
//! operations front-ends need (schedule, cancel, reschedule, list, logs,
//! subscribe). Both binaries build on it.
//!
//! # Example
//!
//! ```no_run
//! use libschedcast::service::{ScheduleRequest, ScheduleTime, SchedcastService};
//! use libschedcast::types::ContentSnapshot;
//! use libschedcast::Config;
//!
//! # async fn example() -> libschedcast::Result<()> {
//! let service = SchedcastService::from_config(Config::load()?).await?;
//! let now = chrono::Utc::now().timestamp();
//!
//! let post = service
//!     .schedule(
//!         ScheduleRequest {
//!             owner_id: "user-1".to_string(),
//!             platform_connection_id: "conn-fb-1".to_string(),
//!             content: ContentSnapshot {
//!                 title: "Launch".to_string(),
//!                 body: "We shipped it.".to_string(),
//!                 media: vec![],
//!             },
//!             when: ScheduleTime::Expression("2h".to_string()),
//!         },
//!         now,
//!     )
//!     .await?;
//! println!("Scheduled {} for {}", post.id, post.scheduled_at);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::audit::SqlitePublishingLog;
use crate::config::Config;
use crate::connections::{ConnectionDirectory, StaticConnections};
use crate::db::Database;
use crate::dispatcher::{Dispatcher, DispatcherSettings};
use crate::error::{Result, SchedcastError};
use crate::executor::PublishExecutor;
use crate::notify::{NotificationEmitter, Subscription};
use crate::platforms::AdapterRegistry;
use crate::retry::RetryPolicies;
use crate::scheduling;
use crate::store::{Page, PostFilter, ScheduledPostStore};
use crate::types::{
    ContentSnapshot, NewScheduledPost, Platform, PostStatus, PublishingLogEntry, ScheduledPost,
};

/// When a post should go out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleTime {
    /// Unix seconds
    At(i64),
    /// Anything [`scheduling::parse_schedule`] understands
    Expression(String),
}

impl ScheduleTime {
    pub fn resolve(&self, now: i64) -> Result<i64> {
        match self {
            ScheduleTime::At(timestamp) => Ok(*timestamp),
            ScheduleTime::Expression(input) => scheduling::parse_schedule(input, now),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub owner_id: String,
    pub platform_connection_id: String,
    pub content: ContentSnapshot,
    pub when: ScheduleTime,
}

#[derive(Debug, Clone)]
pub struct RescheduleRequest {
    pub when: ScheduleTime,
    /// Replacement snapshot; `None` keeps the current one
    pub content: Option<ContentSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub status: Option<PostStatus>,
    pub platform: Option<Platform>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub const DEFAULT_PER_PAGE: u32 = 20;

#[derive(Clone)]
pub struct SchedcastService {
    db: Database,
    store: ScheduledPostStore,
    log: SqlitePublishingLog,
    notifier: NotificationEmitter,
    dispatcher: Arc<Dispatcher>,
}

impl SchedcastService {
    /// Open the configured database and build HTTP adapters for every
    /// platform, with connections taken from the `[[connections]]` table.
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;
        let connections: Arc<dyn ConnectionDirectory> =
            Arc::new(StaticConnections::from_config(&config.connections));
        let adapters = AdapterRegistry::from_config(&config)?;
        Ok(Self::from_parts(&config, db, connections, adapters))
    }

    /// Assemble a service from explicit parts. Tests use this to swap in
    /// mock adapters and in-memory databases.
    pub fn from_parts(
        config: &Config,
        db: Database,
        connections: Arc<dyn ConnectionDirectory>,
        adapters: AdapterRegistry,
    ) -> Self {
        let notifier = NotificationEmitter::new(config.notifications.channel_capacity);
        let store = ScheduledPostStore::new(
            db.clone(),
            Arc::clone(&connections),
            notifier.clone(),
            RetryPolicies::from_config(&config.retry),
        );
        let log = SqlitePublishingLog::new(db.clone());
        let executor = PublishExecutor::new(
            adapters,
            connections,
            store.clone(),
            Arc::new(log.clone()),
            Duration::from_secs(config.publish.timeout_secs),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            executor,
            DispatcherSettings::from(&config.dispatcher),
        ));

        Self {
            db,
            store,
            log,
            notifier,
            dispatcher,
        }
    }

    pub fn store(&self) -> &ScheduledPostStore {
        &self.store
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn notifier(&self) -> &NotificationEmitter {
        &self.notifier
    }

    pub async fn schedule(&self, request: ScheduleRequest, now: i64) -> Result<ScheduledPost> {
        let scheduled_at = request.when.resolve(now)?;
        self.store
            .create(
                NewScheduledPost {
                    owner_id: request.owner_id,
                    platform_connection_id: request.platform_connection_id,
                    content: request.content,
                    scheduled_at,
                },
                now,
            )
            .await
    }

    pub async fn reschedule(
        &self,
        owner_id: &str,
        post_id: &str,
        request: RescheduleRequest,
        now: i64,
    ) -> Result<ScheduledPost> {
        let scheduled_at = request.when.resolve(now)?;
        self.store
            .reschedule(post_id, owner_id, scheduled_at, request.content, now)
            .await
    }

    pub async fn cancel(&self, owner_id: &str, post_id: &str, now: i64) -> Result<ScheduledPost> {
        self.store.cancel(post_id, owner_id, now).await
    }

    pub async fn get(&self, owner_id: &str, post_id: &str) -> Result<ScheduledPost> {
        self.store.get_owned(post_id, owner_id).await
    }

    pub async fn list(&self, owner_id: &str, query: ListQuery) -> Result<Page<ScheduledPost>> {
        let filter = PostFilter {
            owner_id: Some(owner_id.to_string()),
            status: query.status,
            platform: query.platform,
        };
        self.store
            .list(
                &filter,
                query.page.unwrap_or(1),
                query.per_page.unwrap_or(DEFAULT_PER_PAGE),
            )
            .await
    }

    /// Attempt history for one of the caller's posts, oldest first.
    pub async fn logs(&self, owner_id: &str, post_id: &str) -> Result<Vec<PublishingLogEntry>> {
        let post = self.store.get_owned(post_id, owner_id).await?;
        self.log.for_post(&post.id).await
    }

    pub fn subscribe(&self, owner_id: &str) -> Subscription {
        self.notifier.registry().subscribe(owner_id)
    }

    /// Cheap liveness probe against the database
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.db.pool())
            .await
            .map(|_| ())
            .map_err(|e| SchedcastError::Database(e.into()))
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}
