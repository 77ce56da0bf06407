//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid match request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Request store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Shorthand for a store failure
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Shorthand for a validation failure
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

/// Find the matchmaking error carried by an `anyhow` chain, if any
pub fn classify(error: &anyhow::Error) -> Option<&MatchmakingError> {
    error.chain().find_map(|cause| cause.downcast_ref::<MatchmakingError>())
}
