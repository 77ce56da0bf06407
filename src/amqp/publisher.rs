//! AMQP match history publisher

use crate::amqp::messages::{MessageEnvelope, MATCH_EVENTS_EXCHANGE};
use crate::audit::MatchRecorder;
use crate::error::{MatchmakingError, Result};
use crate::types::MatchRecord;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_MS: u64 = 5000;

/// Correlation ids remembered for deduplication
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Configuration for history publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    pub dedup_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: MATCH_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

/// Recently published correlation ids, so a retried hand-off is published
/// once. Holds at most `capacity` ids and forgets the oldest first.
#[derive(Debug)]
pub struct DeduplicationCache {
    seen: Mutex<SeenIds>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct SeenIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl Default for DeduplicationCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_DEDUP_CAPACITY)
    }
}

impl DeduplicationCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(SeenIds::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, correlation_id: &str) -> Result<bool> {
        let seen = self.lock()?;
        Ok(seen.ids.contains(correlation_id))
    }

    pub fn insert(&self, correlation_id: String) -> Result<()> {
        let mut seen = self.lock()?;
        if !seen.ids.insert(correlation_id.clone()) {
            return Ok(());
        }
        seen.order.push_back(correlation_id);

        while seen.order.len() > self.capacity {
            if let Some(oldest) = seen.order.pop_front() {
                seen.ids.remove(&oldest);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|seen| seen.ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SeenIds>> {
        self.seen.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire published messages lock".to_string(),
            }
            .into()
        })
    }
}

/// Next backoff delay, doubling up to five seconds
pub fn next_backoff(delay: Duration) -> Duration {
    delay
        .saturating_mul(2)
        .min(Duration::from_millis(MAX_BACKOFF_MS))
}

/// Recorder publishing each match to a topic exchange
pub struct AmqpMatchRecorder {
    channel: Channel,
    config: PublisherConfig,
    published: DeduplicationCache,
}

impl AmqpMatchRecorder {
    /// Create a recorder and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let recorder = Self {
            channel,
            published: DeduplicationCache::with_capacity(config.dedup_capacity),
            config,
        };

        recorder.setup_exchange().await?;

        Ok(recorder)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let mut args = ExchangeDeclareArguments::new(&self.config.exchange, "topic");
        args.durable(true);
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange, e
                ),
            }
        })?;

        info!("Declared match history exchange {}", self.config.exchange);
        Ok(())
    }

    /// Publish with retry and exponential backoff
    async fn publish(&self, envelope: &MessageEnvelope<MatchRecord>) -> Result<()> {
        if self.config.enable_deduplication && self.published.contains(&envelope.correlation_id)? {
            debug!(
                "Message {} already published, skipping",
                envelope.correlation_id
            );
            return Ok(());
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(_) => {
                    if self.config.enable_deduplication {
                        self.published.insert(envelope.correlation_id.clone())?;
                    }

                    debug!(
                        "Published message {} to exchange {}",
                        envelope.correlation_id, self.config.exchange
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = next_backoff(delay);
                }
            }
        }
    }

    async fn try_publish(&self, envelope: &MessageEnvelope<MatchRecord>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json")
            .with_persistence(true);

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }

    /// Number of cached correlation ids
    pub fn cached_message_count(&self) -> usize {
        self.published.len()
    }
}

#[async_trait]
impl MatchRecorder for AmqpMatchRecorder {
    async fn record(&self, record: MatchRecord) -> Result<()> {
        let envelope = MessageEnvelope::for_match(record);
        self.publish(&envelope).await
    }

    fn name(&self) -> &'static str {
        "amqp"
    }
}
