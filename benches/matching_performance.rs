//! Performance benchmarks for match attempts

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;
use table_match::matching::{select_group, LevelWindowMatcher, Matcher, MatchingConfig};
use table_match::store::{InMemoryRequestStore, RequestStore, StoreConfig};

const TTL: Duration = Duration::from_secs(60);

fn bench_select_group(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryRequestStore::new(StoreConfig::default());

    let (requester, candidates) = rt.block_on(async {
        for id in 1..=500 {
            store.enqueue(id, 1, id % 7, TTL).await.unwrap();
        }
        let requester = store.lookup(1).await.unwrap().unwrap();
        let candidates = store.candidates(1, 0..=7, 1).await.unwrap();
        (requester, candidates)
    });

    let config = MatchingConfig {
        min_players: 4,
        level_window: 1,
    };

    c.bench_function("select_group_500_candidates", |b| {
        b.iter(|| {
            black_box(select_group(
                &requester,
                &candidates,
                &config,
                chrono::Utc::now(),
            ))
        })
    });
}

fn bench_attempt_match(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("attempt_match_pair", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = Arc::new(InMemoryRequestStore::new(StoreConfig::default()));
                let matcher = LevelWindowMatcher::new(store.clone(), MatchingConfig::default());

                let first = store.enqueue(1, 7, 3, TTL).await.unwrap();
                store.enqueue(2, 7, 3, TTL).await.unwrap();

                black_box(matcher.attempt_match(&first).await.unwrap())
            })
        })
    });
}

fn bench_attempt_match_crowded_table(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(InMemoryRequestStore::new(StoreConfig::default()));
    let matcher = LevelWindowMatcher::new(
        store.clone(),
        MatchingConfig {
            min_players: 2,
            level_window: 2,
        },
    );

    // Levels far apart so the background crowd never matches the requester
    rt.block_on(async {
        for id in 1..=1_000 {
            store.enqueue(id, 3, 100 + id * 10, TTL).await.unwrap();
        }
    });

    c.bench_function("attempt_match_no_candidates_crowded", |b| {
        b.iter(|| {
            rt.block_on(async {
                let lonely = store.enqueue(5_000, 3, 0, TTL).await.unwrap();
                black_box(matcher.attempt_match(&lonely).await.unwrap())
            })
        })
    });
}

criterion_group!(
    benches,
    bench_select_group,
    bench_attempt_match,
    bench_attempt_match_crowded_table
);
criterion_main!(benches);
