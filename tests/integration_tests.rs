//! Integration tests for the table-match service
//!
//! These tests drive the full stack in-process:
//! - store, matcher and coordinator working together
//! - expiry of abandoned requests
//! - level windows and table isolation
//! - match history and notifications
//! - the HTTP intake

mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use table_match::coordinator::{CoordinatorConfig, WaitMode};
use table_match::matching::{MatchAttempt, Matcher, MatchingConfig, NoMatchReason};
use table_match::service::intake::{router, PARTICIPANT_HEADER};
use table_match::store::RequestStore;
use table_match::types::{MatchOutcome, MatchRequest, MatchResponse};
use tower::ServiceExt;

use fixtures::{test_coordinator_config, TestSystem};

fn short_wait(mode: WaitMode, wait_timeout: Duration) -> CoordinatorConfig {
    CoordinatorConfig {
        wait_timeout,
        ..test_coordinator_config(mode)
    }
}

#[tokio::test]
async fn test_three_arrivals_pair_in_queue_order() {
    let system = TestSystem::new(WaitMode::Polling);
    let ttl = Duration::from_secs(10);

    let first = system.store.enqueue(1, 7, 3, ttl).await.unwrap();
    system.store.enqueue(2, 7, 3, ttl).await.unwrap();
    let third = system.store.enqueue(3, 7, 3, ttl).await.unwrap();

    match system.matcher.attempt_match(&first).await.unwrap() {
        MatchAttempt::Matched(formed) => assert_eq!(formed.participants, vec![1, 2]),
        other => panic!("expected a match, got {:?}", other),
    }

    assert_eq!(
        system.matcher.attempt_match(&third).await.unwrap(),
        MatchAttempt::NoMatchYet(NoMatchReason::NotEnoughCandidates)
    );

    system.store.enqueue(4, 7, 3, ttl).await.unwrap();
    match system.matcher.attempt_match(&third).await.unwrap() {
        MatchAttempt::Matched(formed) => assert_eq!(formed.participants, vec![3, 4]),
        other => panic!("expected a match, got {:?}", other),
    }

    let settled = system.store.take_result(2).await.unwrap().unwrap();
    assert_eq!(settled.participants, vec![1, 2]);
    assert_eq!(system.store.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_abandoned_request_expires_before_next_arrival() {
    let system = TestSystem::with_configs(
        MatchingConfig::default(),
        short_wait(WaitMode::Polling, Duration::from_millis(200)),
    );

    // Nobody keeps this one alive
    system
        .store
        .enqueue(1, 7, 3, Duration::from_millis(50))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = system
        .coordinator
        .request_match(MatchRequest::new(2, 7, 3))
        .await
        .unwrap();

    assert!(matches!(outcome, MatchOutcome::TimedOut { .. }));
    assert!(system.store.lookup(1).await.unwrap().is_none());
    assert!(system.recorder.is_empty());
}

#[tokio::test]
async fn test_level_window_bounds_matches() {
    for mode in [WaitMode::Polling, WaitMode::Notify] {
        let system = TestSystem::with_configs(
            MatchingConfig::default(),
            short_wait(mode, Duration::from_millis(300)),
        );

        let coordinator = system.coordinator.clone();
        let far = tokio::spawn(async move {
            coordinator.request_match(MatchRequest::new(1, 7, 5)).await
        });
        let near = system
            .coordinator
            .request_match(MatchRequest::new(2, 7, 7))
            .await
            .unwrap();

        assert!(matches!(near, MatchOutcome::TimedOut { .. }), "{mode}");
        assert!(matches!(
            far.await.unwrap().unwrap(),
            MatchOutcome::TimedOut { .. }
        ));

        let coordinator = system.coordinator.clone();
        let first = tokio::spawn(async move {
            coordinator.request_match(MatchRequest::new(3, 7, 5)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = system
            .coordinator
            .request_match(MatchRequest::new(4, 7, 6))
            .await
            .unwrap();

        match (first.await.unwrap().unwrap(), second) {
            (MatchOutcome::Matched(a), MatchOutcome::Matched(b)) => {
                assert_eq!(a, b);
                assert_eq!(a.participants, vec![3, 4]);
                assert_eq!(a.member_levels, vec![5, 6]);
            }
            other => panic!("{mode}: expected both matched, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_tables_never_mix() {
    let system = TestSystem::with_configs(
        MatchingConfig::default(),
        short_wait(WaitMode::Notify, Duration::from_millis(300)),
    );

    let coordinator = system.coordinator.clone();
    let other_table = tokio::spawn(async move {
        coordinator.request_match(MatchRequest::new(1, 1, 3)).await
    });
    let outcome = system
        .coordinator
        .request_match(MatchRequest::new(2, 2, 3))
        .await
        .unwrap();

    assert!(matches!(outcome, MatchOutcome::TimedOut { .. }));
    assert!(matches!(
        other_table.await.unwrap().unwrap(),
        MatchOutcome::TimedOut { .. }
    ));
}

#[tokio::test]
async fn test_match_is_recorded_and_published_once() {
    let system = TestSystem::new(WaitMode::Notify);

    let coordinator = system.coordinator.clone();
    let first = tokio::spawn(async move {
        coordinator.request_match(MatchRequest::new(1, 7, 3)).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = system
        .coordinator
        .request_match(MatchRequest::new(2, 7, 3))
        .await
        .unwrap();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first, second);

    system.settle().await;

    let records = system.recorder.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].participants, vec![1, 2]);
    assert_eq!(records[0].table, 7);
    assert_eq!(system.notifier.matches_published(), 1);
    assert!(system.notifier.arrivals_announced() >= 2);

    let stats = system.coordinator.get_stats().unwrap();
    assert_eq!(stats.matched, 2);
    assert_eq!(stats.matches_announced, 1);
}

#[tokio::test]
async fn test_groups_of_three_across_adjacent_levels() {
    let system = TestSystem::with_configs(
        MatchingConfig {
            min_players: 3,
            level_window: 1,
        },
        test_coordinator_config(WaitMode::Notify),
    );

    let mut waiters = Vec::new();
    for (id, level) in [(1, 3), (2, 4), (3, 4)] {
        let coordinator = system.coordinator.clone();
        waiters.push(tokio::spawn(async move {
            coordinator.request_match(MatchRequest::new(id, 9, level)).await
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let outcomes = futures::future::join_all(waiters).await;
    let mut match_ids = Vec::new();
    for outcome in outcomes {
        match outcome.unwrap().unwrap() {
            MatchOutcome::Matched(formed) => {
                assert_eq!(formed.participants, vec![1, 2, 3]);
                assert_eq!(formed.member_levels, vec![3, 4]);
                match_ids.push(formed.match_id);
            }
            other => panic!("expected a match, got {:?}", other),
        }
    }
    match_ids.dedup();
    assert_eq!(match_ids.len(), 1);
}

#[tokio::test]
async fn test_http_intake_end_to_end() {
    let system = TestSystem::new(WaitMode::Notify);
    let app = router(system.coordinator.clone());

    let request = |participant: &str| {
        Request::builder()
            .uri("/match/4/10")
            .header(PARTICIPANT_HEADER, participant)
            .body(Body::empty())
            .unwrap()
    };

    let first = tokio::spawn(app.clone().oneshot(request("11")));
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = app.oneshot(request("12")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let decode = |bytes: axum::body::Bytes| -> MatchResponse {
        serde_json::from_slice(&bytes).unwrap()
    };
    let first = decode(
        axum::body::to_bytes(first.into_body(), usize::MAX)
            .await
            .unwrap(),
    );
    let second = decode(
        axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .unwrap(),
    );

    assert!(first.matched && second.matched);
    assert_eq!(first.participants, vec![11, 12]);
    assert_eq!(first.match_id, second.match_id);
    assert!(first.reason.is_none());
}

#[tokio::test]
async fn test_closed_store_fails_fast() {
    let system = TestSystem::new(WaitMode::Notify);
    system.store.close();

    let started = tokio::time::Instant::now();
    let response = system
        .coordinator
        .respond(MatchRequest::new(1, 7, 3))
        .await
        .unwrap();

    assert!(!response.matched);
    assert_eq!(
        response.reason,
        Some(table_match::types::FailureReason::StoreUnavailable)
    );
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_dropped_waiter_leaves_nothing_behind() {
    let system = Arc::new(TestSystem::new(WaitMode::Notify));

    let coordinator = system.coordinator.clone();
    let waiter = tokio::spawn(async move {
        coordinator.request_match(MatchRequest::new(1, 7, 3)).await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(system.store.lookup(1).await.unwrap().is_some());

    waiter.abort();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(system.store.lookup(1).await.unwrap().is_none());
}
