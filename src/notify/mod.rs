//! Topic notifications for waiting participants
//!
//! Waiters subscribe to `(table, level)` topics before they enqueue, so any
//! arrival or match notice published after that point is buffered for them.

pub mod broadcast;

pub use broadcast::BroadcastNotifier;

use crate::error::Result;
use crate::types::{MatchEvent, Notice, PendingRequest, Topic};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_stream::Stream;

/// Trait for notice delivery
pub trait Notifier: Send + Sync {
    /// Publish a formed match on every topic it touches; returns deliveries
    fn publish_match(&self, event: &MatchEvent) -> Result<usize>;

    /// Tell waiters on the request's topic that someone arrived
    fn announce_arrival(&self, request: &PendingRequest) -> Result<usize>;

    /// Listen on `topics` until the subscription is dropped or cancelled
    fn subscribe(&self, topics: &[Topic]) -> Result<Subscription>;
}

type NoticeStream = Pin<Box<dyn Stream<Item = Notice> + Send>>;

/// Live feed of notices for a set of topics
pub struct Subscription {
    topics: Vec<Topic>,
    inner: Option<NoticeStream>,
}

impl Subscription {
    pub fn new(topics: Vec<Topic>, inner: NoticeStream) -> Self {
        Self {
            topics,
            inner: Some(inner),
        }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Stop listening; the stream ends and cannot be restarted
    pub fn cancel(&mut self) {
        self.inner = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_none()
    }
}

impl Stream for Subscription {
    type Item = Notice;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Notice>> {
        match self.get_mut().inner.as_mut() {
            Some(stream) => stream.as_mut().poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topics", &self.topics)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
