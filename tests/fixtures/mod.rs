//! Test fixtures shared by the integration suites

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use table_match::audit::InMemoryMatchRecorder;
use table_match::coordinator::{CoordinatorConfig, WaitCoordinator, WaitMode};
use table_match::error::Result;
use table_match::matching::{LevelWindowMatcher, MatchingConfig};
use table_match::notify::{BroadcastNotifier, Notifier, Subscription};
use table_match::store::{InMemoryRequestStore, StoreConfig};
use table_match::types::{MatchEvent, PendingRequest, Topic};

/// Notifier that counts traffic before delegating to a broadcast notifier
#[derive(Default)]
pub struct CountingNotifier {
    inner: BroadcastNotifier,
    matches_published: AtomicUsize,
    arrivals_announced: AtomicUsize,
}

impl CountingNotifier {
    pub fn matches_published(&self) -> usize {
        self.matches_published.load(Ordering::SeqCst)
    }

    pub fn arrivals_announced(&self) -> usize {
        self.arrivals_announced.load(Ordering::SeqCst)
    }
}

impl Notifier for CountingNotifier {
    fn publish_match(&self, event: &MatchEvent) -> Result<usize> {
        self.matches_published.fetch_add(1, Ordering::SeqCst);
        self.inner.publish_match(event)
    }

    fn announce_arrival(&self, request: &PendingRequest) -> Result<usize> {
        self.arrivals_announced.fetch_add(1, Ordering::SeqCst);
        self.inner.announce_arrival(request)
    }

    fn subscribe(&self, topics: &[Topic]) -> Result<Subscription> {
        self.inner.subscribe(topics)
    }
}

/// Timings scaled down for tests
pub fn test_coordinator_config(mode: WaitMode) -> CoordinatorConfig {
    CoordinatorConfig {
        mode,
        request_ttl: Duration::from_millis(500),
        poll_interval: Duration::from_millis(10),
        recheck_interval: Duration::from_millis(100),
        wait_timeout: Duration::from_millis(2_000),
    }
}

/// A complete in-process matchmaking stack
pub struct TestSystem {
    pub store: Arc<InMemoryRequestStore>,
    pub matcher: Arc<LevelWindowMatcher>,
    pub notifier: Arc<CountingNotifier>,
    pub recorder: Arc<InMemoryMatchRecorder>,
    pub coordinator: Arc<WaitCoordinator>,
}

impl TestSystem {
    pub fn new(mode: WaitMode) -> Self {
        Self::with_configs(MatchingConfig::default(), test_coordinator_config(mode))
    }

    pub fn with_configs(matching: MatchingConfig, coordinator: CoordinatorConfig) -> Self {
        let store = Arc::new(InMemoryRequestStore::new(StoreConfig::default()));
        let matcher = Arc::new(LevelWindowMatcher::new(store.clone(), matching));
        let notifier = Arc::new(CountingNotifier::default());
        let recorder = Arc::new(InMemoryMatchRecorder::new());
        let coordinator = Arc::new(WaitCoordinator::new(
            store.clone(),
            matcher.clone(),
            notifier.clone(),
            recorder.clone(),
            coordinator,
        ));

        Self {
            store,
            matcher,
            notifier,
            recorder,
            coordinator,
        }
    }

    /// Let detached recorder tasks finish
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
