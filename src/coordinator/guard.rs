//! Drop guards releasing waiter resources on every exit path

use crate::metrics::MetricsCollector;
use crate::store::RequestStore;
use crate::types::ParticipantId;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Cancels the pending request if the waiting future is dropped early,
/// discarding any result the participant can no longer collect
pub struct PendingGuard {
    store: Arc<dyn RequestStore>,
    participant_id: ParticipantId,
    ticket: u64,
    armed: bool,
}

impl PendingGuard {
    pub fn new(store: Arc<dyn RequestStore>, participant_id: ParticipantId, ticket: u64) -> Self {
        Self {
            store,
            participant_id,
            ticket,
            armed: true,
        }
    }

    /// Track a newer request after a re-enqueue
    pub fn rearm(&mut self, ticket: u64) {
        self.ticket = ticket;
        self.armed = true;
    }

    /// The wait ended normally; nothing to clean up
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!(
                "No runtime to cancel abandoned request for participant {}",
                self.participant_id
            );
            return;
        };

        let store = self.store.clone();
        let participant_id = self.participant_id;
        let ticket = self.ticket;
        handle.spawn(async move {
            match store.cancel(participant_id, Some(ticket)).await {
                Ok(true) => debug!(
                    "Cancelled abandoned request for participant {}",
                    participant_id
                ),
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "Failed to cancel abandoned request for participant {}: {}",
                        participant_id, e
                    );
                    return;
                }
            }

            // Nobody is left to collect a match claimed just before the drop
            if let Ok(None) = store.lookup(participant_id).await {
                if let Ok(Some(formed)) = store.take_result(participant_id).await {
                    debug!(
                        "Discarded uncollected match {} for participant {}",
                        formed.match_id, participant_id
                    );
                }
            }
        });
    }
}

/// Keeps the active waiters gauge in step with live waits
pub struct WaiterGauge {
    metrics: Option<Arc<MetricsCollector>>,
}

impl WaiterGauge {
    pub fn start(metrics: Option<Arc<MetricsCollector>>) -> Self {
        if let Some(metrics) = &metrics {
            metrics.waiter_started();
        }
        Self { metrics }
    }
}

impl Drop for WaiterGauge {
    fn drop(&mut self) {
        if let Some(metrics) = &self.metrics {
            metrics.waiter_finished();
        }
    }
}
