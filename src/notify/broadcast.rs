//! Notifier backed by one tokio broadcast channel per topic

use super::{Notifier, Subscription};
use crate::error::{MatchmakingError, Result};
use crate::types::{MatchEvent, Notice, PendingRequest, Topic};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::debug;

/// Default per-topic buffer
pub const DEFAULT_TOPIC_CAPACITY: usize = 64;

/// In-process notifier
#[derive(Debug)]
pub struct BroadcastNotifier {
    channels: Mutex<HashMap<Topic, broadcast::Sender<Notice>>>,
    capacity: usize,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscribers on a topic
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.lock()
            .map(|channels| {
                channels
                    .get(topic)
                    .map_or(0, |sender| sender.receiver_count())
            })
            .unwrap_or(0)
    }

    /// Number of topics that currently hold a channel
    pub fn topic_count(&self) -> usize {
        self.lock().map(|channels| channels.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Topic, broadcast::Sender<Notice>>>> {
        self.channels.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire notifier lock".to_string(),
            }
            .into()
        })
    }

    fn send(&self, topic: Topic, notice: Notice) -> Result<usize> {
        let mut channels = self.lock()?;

        let Some(sender) = channels.get(&topic) else {
            return Ok(0);
        };

        match sender.send(notice) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                // Every receiver is gone
                channels.remove(&topic);
                debug!("Pruned topic {} with no subscribers", topic);
                Ok(0)
            }
        }
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

impl Notifier for BroadcastNotifier {
    fn publish_match(&self, event: &MatchEvent) -> Result<usize> {
        let mut delivered = 0;
        for topic in event.topics() {
            delivered += self.send(topic, Notice::MatchFormed(event.clone()))?;
        }

        debug!(
            "Published match {} to {} subscribers",
            event.match_id, delivered
        );
        Ok(delivered)
    }

    fn announce_arrival(&self, request: &PendingRequest) -> Result<usize> {
        self.send(
            request.topic(),
            Notice::Arrival {
                participant_id: request.participant_id,
                table: request.table,
                level: request.level,
            },
        )
    }

    fn subscribe(&self, topics: &[Topic]) -> Result<Subscription> {
        let mut channels = self.lock()?;
        channels.retain(|_, sender| sender.receiver_count() > 0);

        let mut streams = StreamMap::new();
        for topic in topics {
            let sender = channels
                .entry(*topic)
                .or_insert_with(|| broadcast::channel(self.capacity).0);
            streams.insert(*topic, BroadcastStream::new(sender.subscribe()));
        }
        drop(channels);

        let notices = streams.map(|(_, received)| match received {
            Ok(notice) => notice,
            Err(BroadcastStreamRecvError::Lagged(missed)) => Notice::Lagged { missed },
        });

        Ok(Subscription::new(topics.to_vec(), Box::pin(notices)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Match;
    use chrono::Utc;
    use std::time::Duration;

    fn pending(id: i64, level: i64) -> PendingRequest {
        let now = Utc::now();
        PendingRequest {
            participant_id: id,
            table: 7,
            level,
            enqueued_at: now,
            refreshed_at: now,
            ttl: Duration::from_secs(10),
            ticket: id as u64,
        }
    }

    #[tokio::test]
    async fn test_arrival_reaches_topic_subscribers() {
        let notifier = BroadcastNotifier::default();
        let mut subscription = notifier
            .subscribe(&[Topic::new(7, 2), Topic::new(7, 3)])
            .unwrap();

        assert_eq!(notifier.announce_arrival(&pending(1, 3)).unwrap(), 1);
        assert_eq!(notifier.announce_arrival(&pending(2, 9)).unwrap(), 0);

        let notice = subscription.next().await.unwrap();
        assert_eq!(
            notice,
            Notice::Arrival {
                participant_id: 1,
                table: 7,
                level: 3
            }
        );
    }

    #[tokio::test]
    async fn test_match_event_reaches_every_member_level() {
        let notifier = BroadcastNotifier::default();
        let mut low = notifier.subscribe(&[Topic::new(7, 4)]).unwrap();
        let mut high = notifier.subscribe(&[Topic::new(7, 5)]).unwrap();

        let formed = Match::from_members(7, 5, &[pending(1, 4), pending(2, 5)]);
        let event = MatchEvent::from(&formed);
        assert_eq!(notifier.publish_match(&event).unwrap(), 2);

        for subscription in [&mut low, &mut high] {
            match subscription.next().await.unwrap() {
                Notice::MatchFormed(received) => assert_eq!(received, event),
                other => panic!("unexpected notice {:?}", other),
            }
        }
    }

    #[test]
    fn test_arrival_wakes_parked_subscriber() {
        let notifier = BroadcastNotifier::default();
        let mut subscription = notifier.subscribe(&[Topic::new(7, 3)]).unwrap();

        let mut next = tokio_test::task::spawn(subscription.next());
        tokio_test::assert_pending!(next.poll());

        notifier.announce_arrival(&pending(1, 3)).unwrap();
        assert!(next.is_woken());
        match tokio_test::assert_ready!(next.poll()) {
            Some(Notice::Arrival { participant_id, .. }) => assert_eq!(participant_id, 1),
            other => panic!("unexpected notice {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_is_told() {
        let notifier = BroadcastNotifier::new(1);
        let mut subscription = notifier.subscribe(&[Topic::new(7, 3)]).unwrap();

        notifier.announce_arrival(&pending(1, 3)).unwrap();
        notifier.announce_arrival(&pending(2, 3)).unwrap();
        notifier.announce_arrival(&pending(3, 3)).unwrap();

        assert_eq!(
            subscription.next().await.unwrap(),
            Notice::Lagged { missed: 2 }
        );
    }

    #[tokio::test]
    async fn test_dropped_subscriptions_are_pruned() {
        let notifier = BroadcastNotifier::default();
        let topic = Topic::new(7, 3);

        let subscription = notifier.subscribe(&[topic]).unwrap();
        assert_eq!(notifier.subscriber_count(&topic), 1);
        drop(subscription);
        assert_eq!(notifier.subscriber_count(&topic), 0);

        assert_eq!(notifier.announce_arrival(&pending(1, 3)).unwrap(), 0);
        assert_eq!(notifier.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_ends() {
        let notifier = BroadcastNotifier::default();
        let mut subscription = notifier.subscribe(&[Topic::new(7, 3)]).unwrap();
        subscription.cancel();

        assert!(subscription.is_cancelled());
        assert!(subscription.next().await.is_none());
        assert_eq!(notifier.subscriber_count(&Topic::new(7, 3)), 0);
    }
}
