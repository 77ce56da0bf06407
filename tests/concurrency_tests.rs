//! High concurrency stress tests
//!
//! Many simultaneous waiters must be partitioned into disjoint matches of
//! exactly `min_players`, with nobody matched twice, in both wait modes.

mod fixtures;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use futures::future::join_all;
use table_match::coordinator::WaitMode;
use table_match::matching::MatchingConfig;
use table_match::store::RequestStore;
use table_match::types::{Match, MatchId, MatchOutcome, MatchRequest, ParticipantId};

use fixtures::{test_coordinator_config, TestSystem};

/// Run every request at once and collect matched outcomes by participant
async fn run_all(
    system: &TestSystem,
    requests: Vec<MatchRequest>,
) -> (HashMap<ParticipantId, Match>, Vec<ParticipantId>) {
    let waiters = requests.into_iter().map(|request| {
        let coordinator = system.coordinator.clone();
        tokio::spawn(async move { (request, coordinator.request_match(request).await) })
    });

    let mut matched = HashMap::new();
    let mut unmatched = Vec::new();
    for joined in join_all(waiters).await {
        let (request, outcome) = joined.unwrap();
        match outcome.unwrap() {
            MatchOutcome::Matched(formed) => {
                assert!(formed.contains(request.participant_id));
                matched.insert(request.participant_id, formed);
            }
            MatchOutcome::TimedOut { .. } => unmatched.push(request.participant_id),
            MatchOutcome::Superseded => panic!("participant {} was superseded", request.participant_id),
        }
    }
    (matched, unmatched)
}

/// Every match is disjoint and agreed on by all of its members
fn assert_disjoint(matched: &HashMap<ParticipantId, Match>, min_players: usize) -> usize {
    let mut by_id: HashMap<MatchId, &Match> = HashMap::new();
    for formed in matched.values() {
        assert_eq!(formed.size(), min_players);
        let seen = by_id.entry(formed.match_id).or_insert(formed);
        assert_eq!(seen.participants, formed.participants);
    }

    let mut placed = HashSet::new();
    for formed in by_id.values() {
        for participant in &formed.participants {
            assert!(placed.insert(*participant), "{participant} placed twice");
        }
    }
    assert_eq!(placed.len(), matched.len());

    by_id.len()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundred_participants_form_fifty_matches() {
    for mode in [WaitMode::Polling, WaitMode::Notify] {
        let system = TestSystem::new(mode);
        let requests = (1..=100).map(|id| MatchRequest::new(id, 7, 3)).collect();

        let start = Instant::now();
        let (matched, unmatched) = run_all(&system, requests).await;
        let elapsed = start.elapsed();

        assert!(unmatched.is_empty(), "{mode}: unmatched {:?}", unmatched);
        assert_eq!(matched.len(), 100);
        assert_eq!(assert_disjoint(&matched, 2), 50, "{mode}");
        assert_eq!(system.store.pending_count().await.unwrap(), 0);

        system.settle().await;
        assert_eq!(system.recorder.len(), 50, "{mode}");
        assert_eq!(system.notifier.matches_published(), 50, "{mode}");

        println!("{} mode: 100 participants matched in {:?}", mode, elapsed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_odd_crowd_leaves_one_behind() {
    let mut coordinator = test_coordinator_config(WaitMode::Notify);
    coordinator.wait_timeout = Duration::from_millis(800);
    let system = TestSystem::with_configs(MatchingConfig::default(), coordinator);

    let requests = (1..=21).map(|id| MatchRequest::new(id, 2, 8)).collect();
    let (matched, unmatched) = run_all(&system, requests).await;

    assert_eq!(assert_disjoint(&matched, 2), 10);
    assert_eq!(unmatched.len(), 1);
    assert!(!matched.contains_key(&unmatched[0]));
    assert!(system.store.lookup(unmatched[0]).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_groups_of_four_over_many_tables() {
    let mut coordinator = test_coordinator_config(WaitMode::Notify);
    coordinator.wait_timeout = Duration::from_millis(1_000);
    let system = TestSystem::with_configs(
        MatchingConfig {
            min_players: 4,
            level_window: 1,
        },
        coordinator,
    );

    // 5 tables x 10 participants, levels alternating 3 and 4
    let requests: Vec<_> = (0..50)
        .map(|i| MatchRequest::new(i + 1, i % 5, 3 + (i / 5) % 2))
        .collect();
    let tables: HashMap<ParticipantId, i64> = requests
        .iter()
        .map(|r| (r.participant_id, r.table))
        .collect();

    let (matched, unmatched) = run_all(&system, requests).await;

    let matches = assert_disjoint(&matched, 4);
    assert_eq!(matches, 10);
    assert_eq!(unmatched.len(), 10);

    for formed in matched.values() {
        assert!(formed
            .participants
            .iter()
            .all(|p| tables[p] == formed.table));
    }

    let mut leftovers: HashMap<i64, usize> = HashMap::new();
    for participant in &unmatched {
        *leftovers.entry(tables[participant]).or_default() += 1;
    }
    assert!(leftovers.values().all(|left| *left < 4));
}
