//! Caller-facing wait protocol
//!
//! A caller enqueues, tries to match, and then suspends until a match forms
//! or its deadline passes. Suspension is either a fixed poll interval or a
//! wait on `(table, level)` notification topics.

pub mod guard;
pub mod waiter;

pub use guard::{PendingGuard, WaiterGauge};
pub use waiter::{CoordinatorStats, WaitCoordinator};

use crate::error::MatchmakingError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How a waiting caller suspends between checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitMode {
    /// Sleep for the poll interval
    Polling,
    /// Wake on topic notices, with a periodic recheck
    #[default]
    Notify,
}

impl WaitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitMode::Polling => "polling",
            WaitMode::Notify => "notify",
        }
    }
}

impl std::fmt::Display for WaitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WaitMode {
    type Err = MatchmakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "polling" | "poll" => Ok(WaitMode::Polling),
            "notify" | "pubsub" => Ok(WaitMode::Notify),
            other => Err(MatchmakingError::ConfigurationError {
                message: format!("Unknown wait mode: {}", other),
            }),
        }
    }
}

/// Timing parameters for the wait protocol
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub mode: WaitMode,
    /// TTL given to every enqueued request
    pub request_ttl: Duration,
    /// Sleep between checks in polling mode
    pub poll_interval: Duration,
    /// Longest notify-mode suspension without a notice; keeps the request alive
    pub recheck_interval: Duration,
    /// Overall deadline for one wait
    pub wait_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let request_ttl = Duration::from_millis(10_000);
        Self {
            mode: WaitMode::Notify,
            request_ttl,
            poll_interval: Duration::from_millis(200),
            recheck_interval: request_ttl / 3,
            wait_timeout: Duration::from_secs(60),
        }
    }
}
