//! Shared fixtures for the engine integration tests
#![allow(dead_code)]

use libschedcast::config::Config;
use libschedcast::connections::{CredentialHandle, PlatformConnection, StaticConnections};
use libschedcast::db::Database;
use libschedcast::platforms::mock::MockAdapter;
use libschedcast::platforms::{AdapterRegistry, PlatformAdapter};
use libschedcast::service::{ScheduleRequest, ScheduleTime, SchedcastService};
use libschedcast::types::{ContentSnapshot, Platform, ScheduledPost};
use secrecy::SecretString;
use std::sync::Arc;

/// 2026-01-15T12:00:00Z
pub const NOW: i64 = 1_768_478_400;
pub const OWNER: &str = "user-1";
pub const CONNECTION: &str = "conn-1";

pub struct Harness {
    pub service: SchedcastService,
    pub connections: Arc<StaticConnections>,
    pub mock: Arc<MockAdapter>,
}

pub fn connection(id: &str, owner: &str, platform: Platform) -> PlatformConnection {
    PlatformConnection {
        id: id.to_string(),
        owner_id: owner.to_string(),
        platform,
        account_name: format!("{} account", platform),
        is_active: true,
        credential_handle: CredentialHandle(format!("inline:{}", id)),
        account_ref: Some("acct-1".to_string()),
    }
}

pub async fn harness(mock: MockAdapter) -> Harness {
    harness_with(Config::default(), mock, Database::in_memory().await.unwrap()).await
}

pub async fn harness_with(config: Config, mock: MockAdapter, db: Database) -> Harness {
    let connections = Arc::new(StaticConnections::new());
    connections.insert(
        connection(CONNECTION, OWNER, mock.platform()),
        SecretString::from("test-token".to_string()),
    );

    let mock = Arc::new(mock);
    let adapters = AdapterRegistry::new().with(mock.clone());
    let service = SchedcastService::from_parts(&config, db, connections.clone(), adapters);

    Harness {
        service,
        connections,
        mock,
    }
}

pub fn content(body: &str) -> ContentSnapshot {
    ContentSnapshot {
        title: "Announcement".to_string(),
        body: body.to_string(),
        media: vec![],
    }
}

impl Harness {
    /// Schedule a post on the default connection `delay` seconds after NOW.
    pub async fn schedule_in(&self, delay: i64) -> ScheduledPost {
        self.service
            .schedule(
                ScheduleRequest {
                    owner_id: OWNER.to_string(),
                    platform_connection_id: CONNECTION.to_string(),
                    content: content("Hello from the scheduler"),
                    when: ScheduleTime::At(NOW + delay),
                },
                NOW,
            )
            .await
            .unwrap()
    }

    pub async fn post(&self, id: &str) -> ScheduledPost {
        self.service.store().get(id).await.unwrap().unwrap()
    }

    /// Tick and wait for every spawned publish to finish.
    pub async fn tick(&self, now: i64) -> libschedcast::dispatcher::TickReport {
        let dispatcher = self.service.dispatcher();
        let report = dispatcher.tick(now).await.unwrap();
        dispatcher.wait_idle().await;
        report
    }

    /// Keep ticking at each retry's due time until the post is terminal.
    /// Returns the number of ticks that claimed it.
    pub async fn run_to_completion(&self, id: &str) -> usize {
        let mut claims = 0;
        for _ in 0..20 {
            let post = self.post(id).await;
            if post.status.is_terminal() {
                return claims;
            }
            let report = self.tick(post.scheduled_at.max(NOW)).await;
            claims += report.claimed;
        }
        panic!("post {} did not reach a terminal state", id);
    }
}
