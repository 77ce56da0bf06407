//! Request store: pending requests indexed by table and level
//!
//! The store owns every pending request from enqueue until it is claimed
//! into a match, cancelled, or expires. Claiming is the only operation that
//! touches several participants at once and it is all-or-nothing.

pub mod memory;

pub use memory::{InMemoryRequestStore, StoreConfig};

use crate::error::Result;
use crate::types::{Level, Match, ParticipantId, PendingRequest, TableId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Result of an atomic claim
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    /// Members removed from the store; empty unless every member was claimed
    pub claimed: Vec<ParticipantId>,
    /// Members that were missing, expired or held a different ticket
    pub already_claimed: Vec<ParticipantId>,
}

impl ClaimOutcome {
    pub fn is_success(&self) -> bool {
        !self.claimed.is_empty() && self.already_claimed.is_empty()
    }
}

/// Result of a keep-alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshOutcome {
    /// The request is still pending and its TTL was reset
    Refreshed,
    /// A newer request for the same participant replaced this one
    Superseded,
    /// The request is no longer pending (claimed, cancelled or expired)
    Gone,
}

/// Counts from an expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeStats {
    pub expired_requests: usize,
    pub stale_results: usize,
}

impl PurgeStats {
    pub fn total(&self) -> usize {
        self.expired_requests + self.stale_results
    }
}

/// Shared storage of pending requests
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Create or refresh the participant's request and reset its TTL
    async fn enqueue(
        &self,
        participant_id: ParticipantId,
        table: TableId,
        level: Level,
        ttl: Duration,
    ) -> Result<PendingRequest>;

    /// Current live request for a participant
    async fn lookup(&self, participant_id: ParticipantId) -> Result<Option<PendingRequest>>;

    /// Live requests at `table` within `levels`, in queue order
    async fn candidates(
        &self,
        table: TableId,
        levels: RangeInclusive<Level>,
        exclude: ParticipantId,
    ) -> Result<Vec<PendingRequest>>;

    /// Atomically remove every member and settle them into `proposed`
    async fn claim(&self, members: &[PendingRequest], proposed: &Match) -> Result<ClaimOutcome>;

    /// Keep-alive for the request holding `ticket`
    async fn refresh(&self, participant_id: ParticipantId, ticket: u64) -> Result<RefreshOutcome>;

    /// Remove and return the match the participant was claimed into
    async fn take_result(&self, participant_id: ParticipantId) -> Result<Option<Match>>;

    /// Remove a pending request; with a ticket only that exact request
    async fn cancel(&self, participant_id: ParticipantId, ticket: Option<u64>) -> Result<bool>;

    /// Physically drop expired requests and stale results
    async fn purge_expired(&self) -> Result<PurgeStats>;

    /// Number of live pending requests
    async fn pending_count(&self) -> Result<usize>;

    /// Close the store; every later operation fails
    fn close(&self);

    fn is_closed(&self) -> bool;
}
