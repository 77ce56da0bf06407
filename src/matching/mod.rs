//! Compatibility matching over the request store

pub mod matcher;

pub use matcher::{
    select_group, LevelWindowMatcher, MatchAttempt, Matcher, MatcherStats, MatchingConfig,
    NoMatchReason,
};
