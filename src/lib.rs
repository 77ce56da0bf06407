//! table-match - level-window matchmaking service
//!
//! Participants ask to be matched at a `(table, level)`. Requests are held in
//! a TTL-bounded store, grouped with others at the same table within a level
//! window, and claimed atomically so nobody lands in two matches. Callers
//! wait by polling or by subscribing to topic notifications.

pub mod amqp;
pub mod audit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod notify;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use audit::MatchRecorder;
pub use coordinator::{CoordinatorConfig, WaitCoordinator, WaitMode};
pub use matching::{LevelWindowMatcher, Matcher, MatchingConfig};
pub use notify::{BroadcastNotifier, Notifier};
pub use store::{InMemoryRequestStore, RequestStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
