//! Utility functions for the matchmaking service

use crate::types::{Level, MatchId, TableId, Topic};
use chrono::{DateTime, Utc};
use std::ops::RangeInclusive;
use uuid::Uuid;

/// Generate a new unique match ID
pub fn generate_match_id() -> MatchId {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Inclusive range of levels compatible with `level`
pub fn level_window(level: Level, window: u32) -> RangeInclusive<Level> {
    let window = Level::from(window);
    level.saturating_sub(window)..=level.saturating_add(window)
}

/// Check if two levels are within the given window
pub fn levels_compatible(a: Level, b: Level, window: u32) -> bool {
    level_window(a, window).contains(&b)
}

/// Topics a waiter at `level` listens on
pub fn window_topics(table: TableId, level: Level, window: u32) -> Vec<Topic> {
    level_window(level, window)
        .map(|l| Topic::new(table, l))
        .collect()
}
