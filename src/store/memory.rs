//! In-memory request store

use super::{ClaimOutcome, PurgeStats, RefreshOutcome, RequestStore};
use crate::error::{MatchmakingError, Result};
use crate::types::{Level, Match, ParticipantId, PendingRequest, TableId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;

/// Configuration for the in-memory store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a settled result waits to be taken before it is swept
    pub result_retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            result_retention: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    request: PendingRequest,
    position: u64,
}

#[derive(Debug, Clone)]
struct Settled {
    formed: Match,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    requests: HashMap<ParticipantId, Entry>,
    index: BTreeMap<(TableId, Level), BTreeSet<(u64, ParticipantId)>>,
    results: HashMap<ParticipantId, Settled>,
    next_ticket: u64,
    next_position: u64,
}

impl Inner {
    fn unindex(&mut self, entry: &Entry) {
        let key = (entry.request.table, entry.request.level);
        if let Some(bucket) = self.index.get_mut(&key) {
            bucket.remove(&(entry.position, entry.request.participant_id));
            if bucket.is_empty() {
                self.index.remove(&key);
            }
        }
    }

    fn remove(&mut self, participant_id: ParticipantId) -> Option<Entry> {
        let entry = self.requests.remove(&participant_id)?;
        self.unindex(&entry);
        Some(entry)
    }

    fn live(&self, participant_id: ParticipantId, now: DateTime<Utc>) -> Option<&Entry> {
        self.requests
            .get(&participant_id)
            .filter(|entry| !entry.request.is_expired(now))
    }

    /// A participant with an uncollected result cannot join another match
    fn holds_result(&self, participant_id: ParticipantId, now: DateTime<Utc>) -> bool {
        self.results
            .get(&participant_id)
            .is_some_and(|settled| settled.expires_at > now)
    }
}

/// Request store kept in process memory behind a single lock
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    inner: RwLock<Inner>,
    closed: AtomicBool,
    config: StoreConfig,
}

impl InMemoryRequestStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            closed: AtomicBool::new(false),
            config,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.ensure_open()?;
        self.inner
            .read()
            .map_err(|_| MatchmakingError::store_unavailable("Failed to acquire store read lock").into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.ensure_open()?;
        self.inner
            .write()
            .map_err(|_| MatchmakingError::store_unavailable("Failed to acquire store write lock").into())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(MatchmakingError::store_unavailable("request store is closed").into());
        }
        Ok(())
    }

    fn result_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.result_retention)
            .ok()
            .and_then(|retention| now.checked_add_signed(retention))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn enqueue(
        &self,
        participant_id: ParticipantId,
        table: TableId,
        level: Level,
        ttl: Duration,
    ) -> Result<PendingRequest> {
        let now = Utc::now();
        let mut inner = self.write()?;

        inner.next_ticket += 1;
        let ticket = inner.next_ticket;

        let kept = inner
            .live(participant_id, now)
            .filter(|entry| entry.request.table == table && entry.request.level == level)
            .map(|entry| (entry.position, entry.request.enqueued_at));

        let (position, enqueued_at) = match kept {
            Some(kept) => kept,
            None => {
                inner.remove(participant_id);
                inner.next_position += 1;
                (inner.next_position, now)
            }
        };

        let request = PendingRequest {
            participant_id,
            table,
            level,
            enqueued_at,
            refreshed_at: now,
            ttl,
            ticket,
        };

        inner
            .index
            .entry((table, level))
            .or_default()
            .insert((position, participant_id));
        inner.requests.insert(
            participant_id,
            Entry {
                request: request.clone(),
                position,
            },
        );

        debug!(
            "Enqueued participant {} at table {} level {} (ticket {})",
            participant_id, table, level, ticket
        );

        Ok(request)
    }

    async fn lookup(&self, participant_id: ParticipantId) -> Result<Option<PendingRequest>> {
        let now = Utc::now();
        let inner = self.read()?;
        Ok(inner
            .live(participant_id, now)
            .map(|entry| entry.request.clone()))
    }

    async fn candidates(
        &self,
        table: TableId,
        levels: RangeInclusive<Level>,
        exclude: ParticipantId,
    ) -> Result<Vec<PendingRequest>> {
        let now = Utc::now();
        let inner = self.read()?;
        if levels.is_empty() {
            return Ok(Vec::new());
        }

        let mut found: Vec<&Entry> = inner
            .index
            .range((table, *levels.start())..=(table, *levels.end()))
            .flat_map(|(_, bucket)| bucket.iter())
            .filter(|(_, id)| *id != exclude && !inner.holds_result(*id, now))
            .filter_map(|(_, id)| inner.live(*id, now))
            .collect();
        found.sort_by_key(|entry| entry.position);

        Ok(found.into_iter().map(|entry| entry.request.clone()).collect())
    }

    async fn claim(&self, members: &[PendingRequest], proposed: &Match) -> Result<ClaimOutcome> {
        let mut seen = HashSet::with_capacity(members.len());
        if members.is_empty() || !members.iter().all(|m| seen.insert(m.participant_id)) {
            return Err(MatchmakingError::invalid_request(
                "claim needs distinct, non-empty members",
            )
            .into());
        }

        let now = Utc::now();
        let mut inner = self.write()?;

        let already_claimed: Vec<ParticipantId> = members
            .iter()
            .filter(|member| {
                inner.holds_result(member.participant_id, now)
                    || inner
                        .live(member.participant_id, now)
                        .map_or(true, |entry| entry.request.ticket != member.ticket)
            })
            .map(|member| member.participant_id)
            .collect();

        if !already_claimed.is_empty() {
            debug!(
                "Claim for match {} rejected, unavailable members: {:?}",
                proposed.match_id, already_claimed
            );
            return Ok(ClaimOutcome {
                claimed: Vec::new(),
                already_claimed,
            });
        }

        let expires_at = self.result_deadline(now);
        let mut claimed = Vec::with_capacity(members.len());
        for member in members {
            inner.remove(member.participant_id);
            inner.results.insert(
                member.participant_id,
                Settled {
                    formed: proposed.clone(),
                    expires_at,
                },
            );
            claimed.push(member.participant_id);
        }

        Ok(ClaimOutcome {
            claimed,
            already_claimed: Vec::new(),
        })
    }

    async fn refresh(&self, participant_id: ParticipantId, ticket: u64) -> Result<RefreshOutcome> {
        let now = Utc::now();
        let mut inner = self.write()?;

        let (current_ticket, expired) = match inner.requests.get(&participant_id) {
            Some(entry) => (entry.request.ticket, entry.request.is_expired(now)),
            None => return Ok(RefreshOutcome::Gone),
        };

        if current_ticket != ticket {
            return Ok(RefreshOutcome::Superseded);
        }

        if expired {
            inner.remove(participant_id);
            return Ok(RefreshOutcome::Gone);
        }

        if let Some(entry) = inner.requests.get_mut(&participant_id) {
            entry.request.refreshed_at = now;
        }
        Ok(RefreshOutcome::Refreshed)
    }

    async fn take_result(&self, participant_id: ParticipantId) -> Result<Option<Match>> {
        let mut inner = self.write()?;
        Ok(inner
            .results
            .remove(&participant_id)
            .map(|settled| settled.formed))
    }

    async fn cancel(&self, participant_id: ParticipantId, ticket: Option<u64>) -> Result<bool> {
        let mut inner = self.write()?;

        let matches_ticket = inner
            .requests
            .get(&participant_id)
            .is_some_and(|entry| ticket.map_or(true, |t| entry.request.ticket == t));

        if matches_ticket {
            inner.remove(participant_id);
            debug!("Cancelled pending request for participant {}", participant_id);
        }

        Ok(matches_ticket)
    }

    async fn purge_expired(&self) -> Result<PurgeStats> {
        let now = Utc::now();
        let mut inner = self.write()?;

        let expired: Vec<ParticipantId> = inner
            .requests
            .values()
            .filter(|entry| entry.request.is_expired(now))
            .map(|entry| entry.request.participant_id)
            .collect();
        for participant_id in &expired {
            inner.remove(*participant_id);
        }

        let before = inner.results.len();
        inner.results.retain(|_, settled| settled.expires_at > now);

        Ok(PurgeStats {
            expired_requests: expired.len(),
            stale_results: before - inner.results.len(),
        })
    }

    async fn pending_count(&self) -> Result<usize> {
        let now = Utc::now();
        let inner = self.read()?;
        Ok(inner
            .requests
            .values()
            .filter(|entry| !entry.request.is_expired(now))
            .count())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;

    const TTL: Duration = Duration::from_secs(10);

    fn create_test_store() -> InMemoryRequestStore {
        InMemoryRequestStore::new(StoreConfig::default())
    }

    #[tokio::test]
    async fn test_enqueue_and_lookup() {
        let store = create_test_store();
        let request = store.enqueue(1, 7, 3, TTL).await.unwrap();

        assert_eq!(request.participant_id, 1);
        assert_eq!(request.table, 7);
        assert_eq!(request.level, 3);

        let found = store.lookup(1).await.unwrap().unwrap();
        assert_eq!(found, request);
        assert!(store.lookup(2).await.unwrap().is_none());
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reenqueue_keeps_position_and_issues_new_ticket() {
        let store = create_test_store();
        let first = store.enqueue(1, 7, 3, TTL).await.unwrap();
        store.enqueue(2, 7, 3, TTL).await.unwrap();
        let again = store.enqueue(1, 7, 3, TTL).await.unwrap();

        assert_ne!(first.ticket, again.ticket);
        assert_eq!(first.enqueued_at, again.enqueued_at);

        let order: Vec<_> = store
            .candidates(7, 3..=3, 99)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.participant_id)
            .collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(store.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_moving_level_goes_to_back_of_queue() {
        let store = create_test_store();
        store.enqueue(1, 7, 3, TTL).await.unwrap();
        store.enqueue(2, 7, 4, TTL).await.unwrap();
        store.enqueue(1, 7, 4, TTL).await.unwrap();

        let order: Vec<_> = store
            .candidates(7, 2..=5, 99)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.participant_id)
            .collect();
        assert_eq!(order, vec![2, 1]);
        assert!(store.candidates(7, 3..=3, 99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_candidates_respect_table_range_and_exclusion() {
        let store = create_test_store();
        store.enqueue(1, 7, 3, TTL).await.unwrap();
        store.enqueue(2, 7, 5, TTL).await.unwrap();
        store.enqueue(3, 8, 3, TTL).await.unwrap();
        store.enqueue(4, 7, 4, TTL).await.unwrap();

        let ids: Vec<_> = store
            .candidates(7, 2..=4, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.participant_id)
            .collect();
        assert_eq!(ids, vec![4]);
    }

    #[tokio::test]
    async fn test_claim_is_all_or_nothing() {
        let store = create_test_store();
        let a = store.enqueue(1, 7, 3, TTL).await.unwrap();
        let b = store.enqueue(2, 7, 3, TTL).await.unwrap();
        let c = store.enqueue(3, 7, 3, TTL).await.unwrap();

        let first = Match::from_members(7, 3, &[a.clone(), b.clone()]);
        let outcome = store.claim(&[a.clone(), b.clone()], &first).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.claimed, vec![1, 2]);

        // b is gone, so c must stay pending
        let second = Match::from_members(7, 3, &[c.clone(), b.clone()]);
        let outcome = store.claim(&[c.clone(), b], &second).await.unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.claimed.is_empty());
        assert_eq!(outcome.already_claimed, vec![2]);
        assert_eq!(store.lookup(3).await.unwrap(), Some(c));

        assert_eq!(store.take_result(1).await.unwrap(), Some(first.clone()));
        assert_eq!(store.take_result(2).await.unwrap(), Some(first));
        assert!(store.take_result(1).await.unwrap().is_none());
        assert!(store.take_result(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_rejects_stale_ticket() {
        let store = create_test_store();
        let stale = store.enqueue(1, 7, 3, TTL).await.unwrap();
        let other = store.enqueue(2, 7, 3, TTL).await.unwrap();
        store.enqueue(1, 7, 3, TTL).await.unwrap();

        let proposed = Match::from_members(7, 3, &[stale.clone(), other.clone()]);
        let outcome = store.claim(&[stale, other], &proposed).await.unwrap();
        assert_eq!(outcome.already_claimed, vec![1]);
        assert_eq!(store.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_claim_rejects_duplicate_members() {
        let store = create_test_store();
        let a = store.enqueue(1, 7, 3, TTL).await.unwrap();
        let proposed = Match::from_members(7, 3, &[a.clone(), a.clone()]);

        let err = store.claim(&[a.clone(), a], &proposed).await.unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(MatchmakingError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_outcomes() {
        let store = create_test_store();
        let old = store.enqueue(1, 7, 3, TTL).await.unwrap();
        assert_eq!(
            store.refresh(1, old.ticket).await.unwrap(),
            RefreshOutcome::Refreshed
        );

        let new = store.enqueue(1, 7, 3, TTL).await.unwrap();
        assert_eq!(
            store.refresh(1, old.ticket).await.unwrap(),
            RefreshOutcome::Superseded
        );

        assert!(store.cancel(1, Some(new.ticket)).await.unwrap());
        assert_eq!(
            store.refresh(1, new.ticket).await.unwrap(),
            RefreshOutcome::Gone
        );
    }

    #[tokio::test]
    async fn test_expired_requests_are_invisible_and_purged() {
        let store = create_test_store();
        store
            .enqueue(1, 7, 3, Duration::from_millis(20))
            .await
            .unwrap();
        store.enqueue(2, 7, 3, TTL).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.lookup(1).await.unwrap().is_none());
        assert!(store.candidates(7, 3..=3, 2).await.unwrap().is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 1);

        let stats = store.purge_expired().await.unwrap();
        assert_eq!(stats.expired_requests, 1);
        assert_eq!(stats.stale_results, 0);
    }

    #[tokio::test]
    async fn test_stale_results_are_purged() {
        let store = InMemoryRequestStore::new(StoreConfig {
            result_retention: Duration::from_millis(10),
        });
        let a = store.enqueue(1, 7, 3, TTL).await.unwrap();
        let b = store.enqueue(2, 7, 3, TTL).await.unwrap();
        let proposed = Match::from_members(7, 3, &[a.clone(), b.clone()]);
        store.claim(&[a, b], &proposed).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let stats = store.purge_expired().await.unwrap();
        assert_eq!(stats.stale_results, 2);
        assert!(store.take_result(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_request_keeps_uncollected_result() {
        let store = create_test_store();
        let a = store.enqueue(1, 7, 3, TTL).await.unwrap();
        let b = store.enqueue(2, 7, 3, TTL).await.unwrap();
        let formed = Match::from_members(7, 3, &[a.clone(), b.clone()]);
        store.claim(&[a, b], &formed).await.unwrap();

        let again = store.enqueue(1, 7, 3, TTL).await.unwrap();
        let c = store.enqueue(3, 7, 3, TTL).await.unwrap();

        // Participant 1 is spoken for until the result is collected
        assert!(store.candidates(7, 3..=3, 3).await.unwrap().is_empty());
        let blocked = Match::from_members(7, 3, &[c.clone(), again.clone()]);
        let outcome = store.claim(&[c, again.clone()], &blocked).await.unwrap();
        assert_eq!(outcome.already_claimed, vec![1]);

        assert_eq!(store.take_result(1).await.unwrap(), Some(formed.clone()));
        assert_eq!(store.take_result(2).await.unwrap(), Some(formed));
        assert_eq!(store.candidates(7, 3..=3, 3).await.unwrap(), vec![again]);
    }

    #[tokio::test]
    async fn test_cancel_with_ticket_only_removes_that_request() {
        let store = create_test_store();
        let old = store.enqueue(1, 7, 3, TTL).await.unwrap();
        store.enqueue(1, 7, 3, TTL).await.unwrap();

        assert!(!store.cancel(1, Some(old.ticket)).await.unwrap());
        assert!(store.lookup(1).await.unwrap().is_some());

        assert!(store.cancel(1, None).await.unwrap());
        assert!(store.lookup(1).await.unwrap().is_none());
        assert!(!store.cancel(1, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let store = create_test_store();
        store.enqueue(1, 7, 3, TTL).await.unwrap();
        store.close();

        assert!(store.is_closed());
        let err = store.enqueue(2, 7, 3, TTL).await.unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(MatchmakingError::StoreUnavailable { .. })
        ));
        assert!(store.lookup(1).await.is_err());
        assert!(store.pending_count().await.is_err());
    }
}
