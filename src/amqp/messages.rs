//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::MatchRecord;

/// Exchange receiving match history
pub const MATCH_EVENTS_EXCHANGE: &str = "matchmaking.match_events";

/// Routing key for formed matches
pub const MATCH_FORMED_ROUTING_KEY: &str = "match.formed";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

impl MessageEnvelope<MatchRecord> {
    /// Envelope for a formed match, keyed by the match id so retries and
    /// duplicate hand-offs collapse to one message
    pub fn for_match(record: MatchRecord) -> Self {
        Self {
            correlation_id: record.match_id.to_string(),
            timestamp: record.formed_at,
            routing_key: MATCH_FORMED_ROUTING_KEY.to_string(),
            payload: record,
        }
    }
}
