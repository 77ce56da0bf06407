//! Common types used throughout the matchmaking service

use crate::error::{MatchmakingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a participant (player)
pub type ParticipantId = i64;

/// Table identifier partitioning the matching space
pub type TableId = i64;

/// Compatibility level used for windowed matching
pub type Level = i64;

/// Unique identifier for formed matches
pub type MatchId = Uuid;

/// Lowest level accepted at intake
pub const MIN_LEVEL: Level = 0;

/// Highest level accepted at intake
pub const MAX_LEVEL: Level = 1_000_000;

/// A participant waiting in the request store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub participant_id: ParticipantId,
    pub table: TableId,
    pub level: Level,
    /// When the participant took its queue position
    pub enqueued_at: DateTime<Utc>,
    /// Last enqueue or keep-alive; the TTL counts from here
    pub refreshed_at: DateTime<Utc>,
    pub ttl: Duration,
    /// Store-issued token, unique per enqueue call
    pub ticket: u64,
}

impl PendingRequest {
    /// Instant after which the request is treated as abandoned
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.refreshed_at.checked_add_signed(ttl))
    }

    /// Whether the request has outlived its TTL at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|deadline| now >= deadline)
    }

    /// Notification topic this request announces itself on
    pub fn topic(&self) -> Topic {
        Topic::new(self.table, self.level)
    }
}

/// A finalized group of participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub match_id: MatchId,
    pub table: TableId,
    /// Level of the participant whose attempt formed the match
    pub level: Level,
    /// Members in queue order
    pub participants: Vec<ParticipantId>,
    /// Distinct levels of the members, ascending
    pub member_levels: Vec<Level>,
    pub formed_at: DateTime<Utc>,
}

impl Match {
    /// Build a match from the claimed members
    pub fn from_members(table: TableId, level: Level, members: &[PendingRequest]) -> Self {
        let mut member_levels: Vec<Level> = members.iter().map(|m| m.level).collect();
        member_levels.sort_unstable();
        member_levels.dedup();

        Self {
            match_id: crate::utils::generate_match_id(),
            table,
            level,
            participants: members.iter().map(|m| m.participant_id).collect(),
            member_levels,
            formed_at: crate::utils::current_timestamp(),
        }
    }

    pub fn contains(&self, participant_id: ParticipantId) -> bool {
        self.participants.contains(&participant_id)
    }

    pub fn size(&self) -> usize {
        self.participants.len()
    }
}

/// Notification topic: one per (table, level) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic {
    pub table: TableId,
    pub level: Level,
}

impl Topic {
    pub fn new(table: TableId, level: Level) -> Self {
        Self { table, level }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user-table-{}-level-{}", self.table, self.level)
    }
}

/// Ephemeral notification that a match was formed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub match_id: MatchId,
    pub table: TableId,
    pub level: Level,
    pub participants: Vec<ParticipantId>,
    pub member_levels: Vec<Level>,
}

impl MatchEvent {
    pub fn names(&self, participant_id: ParticipantId) -> bool {
        self.participants.contains(&participant_id)
    }

    /// Every topic the event is delivered on: the match level plus each member level
    pub fn topics(&self) -> Vec<Topic> {
        let mut levels = self.member_levels.clone();
        levels.push(self.level);
        levels.sort_unstable();
        levels.dedup();
        levels
            .into_iter()
            .map(|level| Topic::new(self.table, level))
            .collect()
    }
}

impl From<&Match> for MatchEvent {
    fn from(formed: &Match) -> Self {
        Self {
            match_id: formed.match_id,
            table: formed.table,
            level: formed.level,
            participants: formed.participants.clone(),
            member_levels: formed.member_levels.clone(),
        }
    }
}

/// Message delivered to subscribers of a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notice {
    /// A new participant is waiting on this topic
    Arrival {
        participant_id: ParticipantId,
        table: TableId,
        level: Level,
    },
    /// A match was formed touching this topic
    MatchFormed(MatchEvent),
    /// The subscriber fell behind and missed notices
    Lagged { missed: u64 },
}

/// Validated intake tuple handed to the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub participant_id: ParticipantId,
    pub table: TableId,
    pub level: Level,
}

impl MatchRequest {
    pub fn new(participant_id: ParticipantId, table: TableId, level: Level) -> Self {
        Self {
            participant_id,
            table,
            level,
        }
    }

    /// Reject out-of-range values rather than guessing
    pub fn validate(&self) -> Result<()> {
        if self.participant_id <= 0 {
            return Err(MatchmakingError::invalid_request(format!(
                "participant id must be positive, got {}",
                self.participant_id
            ))
            .into());
        }

        if self.table < 0 {
            return Err(MatchmakingError::invalid_request(format!(
                "table must not be negative, got {}",
                self.table
            ))
            .into());
        }

        if !(MIN_LEVEL..=MAX_LEVEL).contains(&self.level) {
            return Err(MatchmakingError::invalid_request(format!(
                "level must be within {}..={}, got {}",
                MIN_LEVEL, MAX_LEVEL, self.level
            ))
            .into());
        }

        Ok(())
    }
}

/// History entry handed to the match recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub table: TableId,
    pub level: Level,
    pub participants: Vec<ParticipantId>,
    pub formed_at: DateTime<Utc>,
}

impl From<&Match> for MatchRecord {
    fn from(formed: &Match) -> Self {
        Self {
            match_id: formed.match_id,
            table: formed.table,
            level: formed.level,
            participants: formed.participants.clone(),
            formed_at: formed.formed_at,
        }
    }
}

/// How a wait ended for the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(Match),
    TimedOut { waited: Duration },
    /// A newer request for the same participant took over
    Superseded,
}

/// Reason reported when no match is returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    StoreUnavailable,
    Superseded,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "Timeout"),
            FailureReason::StoreUnavailable => write!(f, "StoreUnavailable"),
            FailureReason::Superseded => write!(f, "Superseded"),
        }
    }
}

/// Result returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResponse {
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

impl MatchResponse {
    pub fn matched(formed: &Match) -> Self {
        Self {
            matched: true,
            participants: formed.participants.clone(),
            match_id: Some(formed.match_id),
            reason: None,
        }
    }

    pub fn failed(reason: FailureReason) -> Self {
        Self {
            matched: false,
            participants: Vec::new(),
            match_id: None,
            reason: Some(reason),
        }
    }
}

impl From<MatchOutcome> for MatchResponse {
    fn from(outcome: MatchOutcome) -> Self {
        match outcome {
            MatchOutcome::Matched(formed) => Self::matched(&formed),
            MatchOutcome::TimedOut { .. } => Self::failed(FailureReason::Timeout),
            MatchOutcome::Superseded => Self::failed(FailureReason::Superseded),
        }
    }
}
