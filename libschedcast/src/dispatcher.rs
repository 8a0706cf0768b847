//! Dispatcher tick loop
//!
//! Each tick sweeps abandoned claims, lists due posts oldest first, claims
//! them one by one and hands the winners to the executor on a bounded pool.
//! A lost claim is skipped silently: another dispatcher instance has it.
//!
//! Concurrency is bounded twice: a global semaphore caps publishes in
//! flight, and an optional per-platform semaphore keeps one platform from
//! using up the whole pool. A post is only claimed once its permits are
//! held, so nothing sits in `publishing` waiting for a worker. Due posts the
//! pool has no room for stay `pending` for a later tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::executor::{anchored_clock, PublishExecutor};
use crate::store::{ClaimOutcome, ScheduledPostStore};
use crate::types::Platform;

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub tick_interval: Duration,
    pub batch_size: u32,
    pub max_concurrent: usize,
    pub platform_concurrency: HashMap<Platform, usize>,
    pub shutdown_grace: Duration,
    pub stale_after: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from(&DispatcherConfig::default())
    }
}

impl From<&DispatcherConfig> for DispatcherSettings {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(config.tick_interval_secs),
            batch_size: config.batch_size,
            max_concurrent: config.max_concurrent,
            platform_concurrency: config.platform_concurrency.clone(),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
            stale_after: Duration::from_secs(config.stale_after_secs),
        }
    }
}

/// Counts for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Stale claims returned to pending (or failed)
    pub requeued: usize,
    pub due: usize,
    pub claimed: usize,
    /// Claims lost to another worker
    pub conflicts: usize,
    /// Due posts left pending because no permit was free
    pub deferred: usize,
}

pub struct Dispatcher {
    store: ScheduledPostStore,
    executor: PublishExecutor,
    settings: DispatcherSettings,
    global: Arc<Semaphore>,
    per_platform: HashMap<Platform, Arc<Semaphore>>,
    in_flight: Mutex<JoinSet<()>>,
}

impl Dispatcher {
    pub fn new(executor: PublishExecutor, settings: DispatcherSettings) -> Self {
        let per_platform = settings
            .platform_concurrency
            .iter()
            .map(|(platform, limit)| (*platform, Arc::new(Semaphore::new((*limit).max(1)))))
            .collect();

        Self {
            store: executor.store().clone(),
            global: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            per_platform,
            executor,
            settings,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// One scan-and-claim cycle at `now` (unix seconds).
    ///
    /// Claimed posts are spawned onto the pool; the tick does not wait for
    /// them. Use [`Dispatcher::wait_idle`] to wait.
    pub async fn tick(&self, now: i64) -> Result<TickReport> {
        let mut report = TickReport::default();

        report.requeued = self
            .store
            .requeue_stale(now, self.settings.stale_after)
            .await?
            .len();

        let due = self.store.list_due(now, self.settings.batch_size).await?;
        report.due = due.len();

        let clock = anchored_clock(now);
        let mut in_flight = self.in_flight.lock().await;
        reap(&mut in_flight);

        for (index, post) in due.iter().enumerate() {
            let permit = match Arc::clone(&self.global).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    report.deferred += due.len() - index;
                    break;
                }
            };
            let platform_permit = match self.per_platform.get(&post.platform) {
                Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        report.deferred += 1;
                        continue;
                    }
                },
                None => None,
            };

            match self.store.claim(&post.id, post.version, clock()).await? {
                ClaimOutcome::Claimed(claimed) => {
                    report.claimed += 1;
                    let executor = self.executor.clone();
                    let clock = Arc::clone(&clock);

                    in_flight.spawn(async move {
                        let _permits = (permit, platform_permit);
                        let post_id = claimed.id.clone();
                        if let Err(e) = executor.execute(claimed, &clock).await {
                            error!(post_id = %post_id, error = %e, "Publish execution failed");
                        }
                    });
                }
                ClaimOutcome::Conflict => {
                    report.conflicts += 1;
                    debug!(post_id = %post.id, "Skipping post claimed elsewhere");
                }
            }
        }

        if report != TickReport::default() {
            info!(
                requeued = report.requeued,
                due = report.due,
                claimed = report.claimed,
                conflicts = report.conflicts,
                deferred = report.deferred,
                "Dispatcher tick"
            );
        }
        Ok(report)
    }

    /// Publishes spawned by earlier ticks that have not finished yet
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Wait for every in-flight publish to finish.
    pub async fn wait_idle(&self) {
        let mut in_flight = self.in_flight.lock().await;
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Publish task panicked");
            }
        }
    }

    /// Tick on the configured interval until `shutdown` flips to `true`,
    /// then drain.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            interval_secs = self.settings.tick_interval.as_secs(),
            batch_size = self.settings.batch_size,
            max_concurrent = self.settings.max_concurrent,
            "Dispatcher started"
        );

        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = self.tick(now).await {
                        // Store trouble is worth surviving; the next tick retries
                        error!(error = %e, "Dispatcher tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.drain(self.settings.shutdown_grace).await;
        info!("Dispatcher stopped");
        Ok(())
    }

    /// Let in-flight publishes finish for up to `grace`, then abort the rest.
    ///
    /// Aborted posts stay in `publishing` until the recovery sweep picks
    /// them up.
    pub async fn drain(&self, grace: Duration) {
        let pending = self.in_flight().await;
        if pending == 0 {
            return;
        }
        info!(in_flight = pending, grace_secs = grace.as_secs(), "Draining in-flight publishes");

        if tokio::time::timeout(grace, self.wait_idle()).await.is_err() {
            let mut in_flight = self.in_flight.lock().await;
            warn!(
                aborted = in_flight.len(),
                "Grace period elapsed, aborting remaining publishes"
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
    }
}

/// Collect finished tasks so the set does not grow without bound.
fn reap(in_flight: &mut JoinSet<()>) {
    while let Some(joined) = in_flight.try_join_next() {
        if let Err(e) = joined {
            error!(error = %e, "Publish task panicked");
        }
    }
}
