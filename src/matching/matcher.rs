//! Level-window matcher
//!
//! A requester is grouped with the earliest-queued live requests at the same
//! table whose level lies within `level_window` of its own. The group is
//! committed through a single store claim, so two matchers racing for the
//! same participant can never both succeed.

use crate::error::{MatchmakingError, Result};
use crate::store::RequestStore;
use crate::types::{Match, PendingRequest};
use crate::utils::{level_window, levels_compatible};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Outcome of one match attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchAttempt {
    Matched(Match),
    NoMatchYet(NoMatchReason),
}

/// Why an attempt did not form a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoMatchReason {
    /// Fewer than `min_players` compatible live requests
    NotEnoughCandidates,
    /// Another attempt claimed one of the selected members first
    RaceLost,
}

/// Matching parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Exact group size
    pub min_players: usize,
    /// Maximum level distance from the requester
    pub level_window: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            level_window: 1,
        }
    }
}

/// Counters kept by the matcher
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatcherStats {
    pub attempts: u64,
    pub matches_formed: u64,
    pub race_losses: u64,
    pub not_enough_candidates: u64,
}

/// Trait for match-forming strategies
#[async_trait]
pub trait Matcher: Send + Sync {
    /// Try to form a match that includes `request`
    async fn attempt_match(&self, request: &PendingRequest) -> Result<MatchAttempt>;

    /// Parameters this matcher groups by
    fn config(&self) -> MatchingConfig;
}

/// Pick the group for `requester` from queue-ordered candidates.
///
/// Candidates outside the level window or expired at `now` are skipped. The
/// first `min_players - 1` survivors join the requester; `None` when there
/// are not enough of them.
pub fn select_group(
    requester: &PendingRequest,
    candidates: &[PendingRequest],
    config: &MatchingConfig,
    now: DateTime<Utc>,
) -> Option<Vec<PendingRequest>> {
    let needed = config.min_players.saturating_sub(1);

    let selected: Vec<PendingRequest> = candidates
        .iter()
        .filter(|c| c.participant_id != requester.participant_id)
        .filter(|c| c.table == requester.table)
        .filter(|c| levels_compatible(requester.level, c.level, config.level_window))
        .filter(|c| !c.is_expired(now))
        .take(needed)
        .cloned()
        .collect();

    if selected.len() < needed {
        return None;
    }

    let mut members = Vec::with_capacity(config.min_players);
    members.push(requester.clone());
    members.extend(selected);
    members.sort_by_key(|m| (m.enqueued_at, m.ticket));
    Some(members)
}

/// Matcher grouping by table and level window
pub struct LevelWindowMatcher {
    store: Arc<dyn RequestStore>,
    config: MatchingConfig,
    stats: Arc<RwLock<MatcherStats>>,
}

impl LevelWindowMatcher {
    pub fn new(store: Arc<dyn RequestStore>, config: MatchingConfig) -> Self {
        Self {
            store,
            config,
            stats: Arc::new(RwLock::new(MatcherStats::default())),
        }
    }

    /// Get matcher statistics
    pub fn get_stats(&self) -> Result<MatcherStats> {
        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire matcher stats lock".to_string(),
            })?;
        Ok(stats.clone())
    }

    fn update_stats(&self, update: impl FnOnce(&mut MatcherStats)) -> Result<()> {
        let mut stats = self
            .stats
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire matcher stats lock".to_string(),
            })?;
        update(&mut stats);
        Ok(())
    }
}

#[async_trait]
impl Matcher for LevelWindowMatcher {
    async fn attempt_match(&self, request: &PendingRequest) -> Result<MatchAttempt> {
        self.update_stats(|s| s.attempts += 1)?;

        let candidates = self
            .store
            .candidates(
                request.table,
                level_window(request.level, self.config.level_window),
                request.participant_id,
            )
            .await?;

        let Some(members) = select_group(request, &candidates, &self.config, Utc::now()) else {
            debug!(
                "Participant {} has {} compatible candidates, needs {}",
                request.participant_id,
                candidates.len(),
                self.config.min_players.saturating_sub(1)
            );
            self.update_stats(|s| s.not_enough_candidates += 1)?;
            return Ok(MatchAttempt::NoMatchYet(NoMatchReason::NotEnoughCandidates));
        };

        let proposed = Match::from_members(request.table, request.level, &members);
        let outcome = self.store.claim(&members, &proposed).await?;

        if !outcome.is_success() {
            debug!(
                "Participant {} lost claim race for {:?}",
                request.participant_id, outcome.already_claimed
            );
            self.update_stats(|s| s.race_losses += 1)?;
            return Ok(MatchAttempt::NoMatchYet(NoMatchReason::RaceLost));
        }

        info!(
            "Formed match {} at table {} level {} with participants {:?}",
            proposed.match_id, proposed.table, proposed.level, proposed.participants
        );
        self.update_stats(|s| s.matches_formed += 1)?;

        Ok(MatchAttempt::Matched(proposed))
    }

    fn config(&self) -> MatchingConfig {
        self.config
    }
}
