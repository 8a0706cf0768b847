//! Scheduled post store: validation, due listing, claiming, cancel,
//! reschedule and the recovery sweep.

mod common;

use common::*;
use libschedcast::db::Database;
use libschedcast::error::SchedcastError;
use libschedcast::platforms::mock::MockAdapter;
use libschedcast::service::{ListQuery, RescheduleRequest, ScheduleRequest, ScheduleTime};
use libschedcast::store::{ClaimOutcome, PostFilter};
use libschedcast::types::{ContentSnapshot, Outcome, Platform, PostStatus};
use libschedcast::Config;
use std::time::Duration;
use tempfile::TempDir;

fn request(connection: &str, when: i64) -> ScheduleRequest {
    ScheduleRequest {
        owner_id: OWNER.to_string(),
        platform_connection_id: connection.to_string(),
        content: content("Store test"),
        when: ScheduleTime::At(when),
    }
}

#[tokio::test]
async fn test_create_sets_initial_state() {
    let h = harness(MockAdapter::success(Platform::Facebook)).await;
    let post = h.schedule_in(300).await;

    assert_eq!(post.status, PostStatus::Pending);
    assert_eq!(post.attempts, 0);
    assert_eq!(post.version, 0);
    assert_eq!(post.platform, Platform::Facebook);
    assert_eq!(post.scheduled_at, NOW + 300);
    assert_eq!(post.created_at, NOW);
    assert!(post.last_error.is_none());
    assert!(post.external_ref.is_none());
}

#[tokio::test]
async fn test_create_rejects_invalid_input() {
    let h = harness(MockAdapter::success(Platform::Facebook)).await;

    // Not strictly in the future
    let err = h.service.schedule(request(CONNECTION, NOW), NOW).await.unwrap_err();
    assert!(matches!(err, SchedcastError::Validation(_)));

    // Unknown connection
    let err = h
        .service
        .schedule(request("conn-missing", NOW + 60), NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedcastError::Validation(_)));

    // Someone else's connection
    h.connections.insert(
        connection("conn-other", "user-2", Platform::Facebook),
        secrecy::SecretString::from("t".to_string()),
    );
    let err = h
        .service
        .schedule(request("conn-other", NOW + 60), NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedcastError::Validation(_)));

    // Inactive connection
    h.connections.set_active(CONNECTION, false);
    let err = h
        .service
        .schedule(request(CONNECTION, NOW + 60), NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedcastError::Validation(ref m) if m.contains("not active")));
    h.connections.set_active(CONNECTION, true);

    // Empty content
    let mut empty = request(CONNECTION, NOW + 60);
    empty.content = ContentSnapshot::default();
    let err = h.service.schedule(empty, NOW).await.unwrap_err();
    assert!(matches!(err, SchedcastError::Validation(_)));

    let page = h.service.list(OWNER, ListQuery::default()).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_list_due_never_returns_future_posts() {
    let h = harness(MockAdapter::success(Platform::Facebook)).await;
    for delay in [500, 100, 300, 900, 200, 700] {
        h.schedule_in(delay).await;
    }

    let store = h.service.store();
    for now in [NOW, NOW + 150, NOW + 300, NOW + 650, NOW + 1000] {
        let due = store.list_due(now, 100).await.unwrap();
        assert!(due.iter().all(|p| p.scheduled_at <= now));
        assert!(due.iter().all(|p| p.status == PostStatus::Pending));
        let times: Vec<i64> = due.iter().map(|p| p.scheduled_at).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted, "due posts must be oldest first");
    }

    assert_eq!(store.list_due(NOW + 650, 100).await.unwrap().len(), 4);
    let capped = store.list_due(NOW + 1000, 2).await.unwrap();
    assert_eq!(
        capped.iter().map(|p| p.scheduled_at).collect::<Vec<_>>(),
        vec![NOW + 100, NOW + 200]
    );
}

#[tokio::test]
async fn test_claim_is_version_gated() {
    let h = harness(MockAdapter::success(Platform::Facebook)).await;
    let post = h.schedule_in(60).await;
    let store = h.service.store();

    let claimed = match store.claim(&post.id, post.version, NOW + 60).await.unwrap() {
        ClaimOutcome::Claimed(p) => p,
        ClaimOutcome::Conflict => panic!("first claim must win"),
    };
    assert_eq!(claimed.status, PostStatus::Publishing);
    assert_eq!(claimed.version, post.version + 1);

    // Same expected version again: lost
    assert!(matches!(
        store.claim(&post.id, post.version, NOW + 60).await.unwrap(),
        ClaimOutcome::Conflict
    ));
    // Current version, but not pending any more
    assert!(matches!(
        store.claim(&post.id, claimed.version, NOW + 60).await.unwrap(),
        ClaimOutcome::Conflict
    ));
    assert!(matches!(
        store.claim("no-such-post", 0, NOW).await.unwrap(),
        ClaimOutcome::Conflict
    ));
}

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("race.db");
    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    let h = harness_with(Config::default(), MockAdapter::success(Platform::Twitter), db).await;
    let post = h.schedule_in(60).await;

    let workers = 16;
    let mut handles = Vec::new();
    for _ in 0..workers {
        let store = h.service.store().clone();
        let id = post.id.clone();
        handles.push(tokio::spawn(async move {
            store.claim(&id, 0, NOW + 60).await.unwrap()
        }));
    }

    let mut won = 0;
    let mut lost = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ClaimOutcome::Claimed(_) => won += 1,
            ClaimOutcome::Conflict => lost += 1,
        }
    }
    assert_eq!(won, 1);
    assert_eq!(lost, workers - 1);

    let after = h.post(&post.id).await;
    assert_eq!(after.status, PostStatus::Publishing);
    assert_eq!(after.version, 1);
}

#[tokio::test]
async fn test_cancel_only_while_pending() {
    let h = harness(MockAdapter::success(Platform::Facebook)).await;
    let store = h.service.store();

    // publishing
    let publishing = h.schedule_in(60).await;
    store.claim(&publishing.id, 0, NOW + 60).await.unwrap();
    let err = h
        .service
        .cancel(OWNER, &publishing.id, NOW + 61)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedcastError::StateConflict {
            status: PostStatus::Publishing,
            ..
        }
    ));
    let unchanged = h.post(&publishing.id).await;
    assert_eq!(unchanged.status, PostStatus::Publishing);
    assert_eq!(unchanged.version, 1);

    // published
    store
        .record_outcome(
            &publishing.id,
            1,
            Outcome::Success {
                external_ref: "ext-1".to_string(),
            },
            NOW + 62,
        )
        .await
        .unwrap();
    let err = h
        .service
        .cancel(OWNER, &publishing.id, NOW + 63)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedcastError::StateConflict {
            status: PostStatus::Published,
            ..
        }
    ));

    // failed
    let failing = h.schedule_in(120).await;
    store.claim(&failing.id, 0, NOW + 120).await.unwrap();
    store
        .record_outcome(
            &failing.id,
            1,
            Outcome::PermanentFailure(libschedcast::PublishError::permanent("bad token")),
            NOW + 121,
        )
        .await
        .unwrap();
    let err = h.service.cancel(OWNER, &failing.id, NOW + 122).await.unwrap_err();
    assert!(matches!(
        err,
        SchedcastError::StateConflict {
            status: PostStatus::Failed,
            ..
        }
    ));

    // someone else's post looks missing
    let pending = h.schedule_in(600).await;
    let err = h.service.cancel("user-2", &pending.id, NOW + 1).await.unwrap_err();
    assert!(matches!(err, SchedcastError::NotFound(_)));

    // pending, owned: works, and only once
    let cancelled = h.service.cancel(OWNER, &pending.id, NOW + 1).await.unwrap();
    assert_eq!(cancelled.status, PostStatus::Cancelled);
    assert_eq!(cancelled.version, 1);
    let err = h.service.cancel(OWNER, &pending.id, NOW + 2).await.unwrap_err();
    assert!(matches!(
        err,
        SchedcastError::StateConflict {
            status: PostStatus::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn test_reschedule() {
    let h = harness(MockAdapter::success(Platform::Facebook)).await;
    let post = h.schedule_in(300).await;

    let moved = h
        .service
        .reschedule(
            OWNER,
            &post.id,
            RescheduleRequest {
                when: ScheduleTime::Expression("2h".to_string()),
                content: Some(content("Edited while pending")),
            },
            NOW + 10,
        )
        .await
        .unwrap();
    assert_eq!(moved.scheduled_at, NOW + 10 + 7200);
    assert_eq!(moved.content.body, "Edited while pending");
    assert_eq!(moved.version, 1);
    assert_eq!(moved.status, PostStatus::Pending);

    // Keeps the content when none is given
    let again = h
        .service
        .reschedule(
            OWNER,
            &post.id,
            RescheduleRequest {
                when: ScheduleTime::At(NOW + 900),
                content: None,
            },
            NOW + 20,
        )
        .await
        .unwrap();
    assert_eq!(again.content.body, "Edited while pending");
    assert_eq!(again.scheduled_at, NOW + 900);

    // Into the past
    let err = h
        .service
        .reschedule(
            OWNER,
            &post.id,
            RescheduleRequest {
                when: ScheduleTime::At(NOW),
                content: None,
            },
            NOW + 20,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedcastError::Validation(_)));

    // Not pending any more
    h.service.cancel(OWNER, &post.id, NOW + 30).await.unwrap();
    let err = h
        .service
        .reschedule(
            OWNER,
            &post.id,
            RescheduleRequest {
                when: ScheduleTime::At(NOW + 5000),
                content: None,
            },
            NOW + 40,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedcastError::StateConflict {
            status: PostStatus::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn test_requeue_stale_claims() {
    let h = harness(MockAdapter::success(Platform::Facebook)).await;
    let store = h.service.store();
    let post = h.schedule_in(60).await;
    store.claim(&post.id, 0, NOW + 60).await.unwrap();

    let stale_after = Duration::from_secs(600);
    assert!(store
        .requeue_stale(NOW + 300, stale_after)
        .await
        .unwrap()
        .is_empty());

    let requeued = store.requeue_stale(NOW + 700, stale_after).await.unwrap();
    assert_eq!(requeued.len(), 1);
    let recovered = &requeued[0];
    assert_eq!(recovered.status, PostStatus::Pending);
    assert_eq!(recovered.attempts, 1);
    assert_eq!(recovered.scheduled_at, NOW + 700);
    assert_eq!(recovered.version, 2);
    assert!(recovered.last_error.as_ref().unwrap().is_transient());

    // The original worker finishing late loses
    let err = store
        .record_outcome(
            &post.id,
            1,
            Outcome::Success {
                external_ref: "late".to_string(),
            },
            NOW + 701,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedcastError::StateConflict {
            status: PostStatus::Pending,
            ..
        }
    ));
}

#[tokio::test]
async fn test_requeue_stale_exhausted_goes_to_failed() {
    let config = Config::parse("[retry]\nmax_attempts = 1\n").unwrap();
    let h = harness_with(
        config,
        MockAdapter::success(Platform::Facebook),
        Database::in_memory().await.unwrap(),
    )
    .await;
    let store = h.service.store();
    let post = h.schedule_in(60).await;
    store.claim(&post.id, 0, NOW + 60).await.unwrap();

    let requeued = store
        .requeue_stale(NOW + 10_000, Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(requeued[0].status, PostStatus::Failed);
    assert_eq!(requeued[0].attempts, 1);
}

#[tokio::test]
async fn test_list_filters_and_pages() {
    let h = harness(MockAdapter::success(Platform::Facebook)).await;
    h.connections.insert(
        connection("conn-tw", OWNER, Platform::Twitter),
        secrecy::SecretString::from("t".to_string()),
    );
    for i in 0..5 {
        h.schedule_in(100 + i).await;
    }
    for i in 0..3 {
        h.service
            .schedule(request("conn-tw", NOW + 200 + i), NOW)
            .await
            .unwrap();
    }
    let cancelled = h.schedule_in(999).await;
    h.service.cancel(OWNER, &cancelled.id, NOW + 1).await.unwrap();

    let all = h.service.list(OWNER, ListQuery::default()).await.unwrap();
    assert_eq!(all.total, 9);
    assert_eq!(all.page, 1);

    let twitter = h
        .service
        .list(
            OWNER,
            ListQuery {
                platform: Some(Platform::Twitter),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(twitter.total, 3);
    assert!(twitter.items.iter().all(|p| p.platform == Platform::Twitter));

    let pending_page = h
        .service
        .list(
            OWNER,
            ListQuery {
                status: Some(PostStatus::Pending),
                page: Some(2),
                per_page: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(pending_page.total, 8);
    assert_eq!(pending_page.items.len(), 3);
    assert_eq!(pending_page.page, 2);
    assert_eq!(pending_page.per_page, 3);

    let capped = h
        .service
        .list(
            OWNER,
            ListQuery {
                per_page: Some(10_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(capped.per_page, libschedcast::store::MAX_PER_PAGE);

    let stranger = h
        .service
        .store()
        .list(
            &PostFilter {
                owner_id: Some("user-2".to_string()),
                ..Default::default()
            },
            1,
            20,
        )
        .await
        .unwrap();
    assert_eq!(stranger.total, 0);
}

#[tokio::test]
async fn test_transient_outcome_follows_platform_backoff() {
    let config = Config::parse(
        r#"
[retry]
max_attempts = 4

[retry.platforms.tiktok]
base_delay_secs = 5
max_delay_secs = 15
"#,
    )
    .unwrap();
    let h = harness_with(
        config,
        MockAdapter::success(Platform::Tiktok),
        Database::in_memory().await.unwrap(),
    )
    .await;
    let store = h.service.store();
    let policy = store.policies().for_platform(Platform::Tiktok);
    let post = h.schedule_in(60).await;

    let mut version = 0;
    let mut now = NOW + 60;
    for attempt in 1..=4u32 {
        let claimed = match store.claim(&post.id, version, now).await.unwrap() {
            ClaimOutcome::Claimed(claimed) => claimed,
            ClaimOutcome::Conflict => panic!("claim {} should succeed", attempt),
        };
        let after = store
            .record_outcome(
                &post.id,
                claimed.version,
                Outcome::TransientFailure(libschedcast::PublishError::transient("busy")),
                now + 1,
            )
            .await
            .unwrap();
        assert_eq!(after.attempts, attempt);
        assert_eq!(after.version, claimed.version + 1);

        if attempt < 4 {
            assert_eq!(after.status, PostStatus::Pending);
            let expected = now + 1 + policy.backoff(attempt).as_secs() as i64;
            assert_eq!(after.scheduled_at, expected);
            now = after.scheduled_at;
        } else {
            assert_eq!(after.status, PostStatus::Failed);
            assert_eq!(after.scheduled_at, now);
        }
        version = after.version;
    }

    // Backoff is capped by the override's max_delay
    assert_eq!(policy.backoff(3), Duration::from_secs(15));
}

#[tokio::test]
async fn test_touch_claim_only_refreshes_live_claims() {
    let h = harness(MockAdapter::success(Platform::Facebook)).await;
    let store = h.service.store();
    let post = h.schedule_in(60).await;

    // Not claimed yet
    assert!(!store.touch_claim(&post.id, 0, NOW + 60).await.unwrap());

    store.claim(&post.id, 0, NOW + 60).await.unwrap();
    assert!(store.touch_claim(&post.id, 1, NOW + 500).await.unwrap());
    let touched = h.post(&post.id).await;
    assert_eq!(touched.updated_at, NOW + 500);
    assert_eq!(touched.version, 1);

    // Staleness now counts from the touch
    assert!(store
        .requeue_stale(NOW + 700, Duration::from_secs(600))
        .await
        .unwrap()
        .is_empty());

    // Wrong version
    assert!(!store.touch_claim(&post.id, 0, NOW + 501).await.unwrap());
}
