//! Wait coordinator: enqueue, attempt, suspend, repeat until deadline

use super::guard::{PendingGuard, WaiterGauge};
use super::{CoordinatorConfig, WaitMode};
use crate::audit::MatchRecorder;
use crate::error::{classify, MatchmakingError, Result};
use crate::matching::{MatchAttempt, Matcher, NoMatchReason};
use crate::metrics::MetricsCollector;
use crate::notify::{Notifier, Subscription};
use crate::store::{RefreshOutcome, RequestStore};
use crate::types::{
    FailureReason, Match, MatchEvent, MatchOutcome, MatchRecord, MatchRequest, MatchResponse,
    ParticipantId, PendingRequest,
};
use crate::utils::window_topics;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::time::{sleep_until, Instant};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Counters kept by the coordinator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub requests: u64,
    pub rejected: u64,
    pub matched: u64,
    pub timed_out: u64,
    pub superseded: u64,
    pub store_errors: u64,
    pub reenqueued: u64,
    pub matches_announced: u64,
    pub recorder_failures: u64,
}

/// Caller-facing matchmaking entry point
pub struct WaitCoordinator {
    store: Arc<dyn RequestStore>,
    matcher: Arc<dyn Matcher>,
    notifier: Arc<dyn Notifier>,
    recorder: Arc<dyn MatchRecorder>,
    metrics: Option<Arc<MetricsCollector>>,
    config: CoordinatorConfig,
    stats: Arc<RwLock<CoordinatorStats>>,
}

impl WaitCoordinator {
    pub fn new(
        store: Arc<dyn RequestStore>,
        matcher: Arc<dyn Matcher>,
        notifier: Arc<dyn Notifier>,
        recorder: Arc<dyn MatchRecorder>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            matcher,
            notifier,
            recorder,
            metrics: None,
            config,
            stats: Arc::new(RwLock::new(CoordinatorStats::default())),
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn RequestStore> {
        self.store.clone()
    }

    /// Get coordinator statistics
    pub fn get_stats(&self) -> Result<CoordinatorStats> {
        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire coordinator stats lock".to_string(),
            })?;
        Ok(stats.clone())
    }

    /// Live pending requests
    pub async fn pending_count(&self) -> Result<usize> {
        self.store.pending_count().await
    }

    /// Withdraw whatever request the participant has pending
    pub async fn cancel(&self, participant_id: ParticipantId) -> Result<bool> {
        let cancelled = self.store.cancel(participant_id, None).await?;
        if cancelled {
            info!("Participant {} withdrew its request", participant_id);
        }
        Ok(cancelled)
    }

    /// Run the wait protocol and shape the result for callers.
    ///
    /// Validation failures stay errors; a store outage becomes a
    /// `StoreUnavailable` response.
    pub async fn respond(&self, request: MatchRequest) -> Result<MatchResponse> {
        match self.request_match(request).await {
            Ok(outcome) => Ok(MatchResponse::from(outcome)),
            Err(e) => match classify(&e) {
                Some(MatchmakingError::StoreUnavailable { .. }) => {
                    Ok(MatchResponse::failed(FailureReason::StoreUnavailable))
                }
                _ => Err(e),
            },
        }
    }

    /// Wait until the participant is matched, superseded or times out
    pub async fn request_match(&self, request: MatchRequest) -> Result<MatchOutcome> {
        if let Err(e) = request.validate() {
            self.update_stats(|s| s.rejected += 1);
            if let Some(metrics) = &self.metrics {
                metrics.record_rejected();
            }
            return Err(e);
        }

        self.update_stats(|s| s.requests += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_request(self.config.mode.as_str());
        }
        let _gauge = WaiterGauge::start(self.metrics.clone());

        let started = Instant::now();
        let result = self.wait_for_match(request, started).await;
        let waited = started.elapsed();

        match &result {
            Ok(MatchOutcome::Matched(formed)) => {
                self.update_stats(|s| s.matched += 1);
                self.record_outcome("matched", waited);
                debug!(
                    "Participant {} matched into {} after {:?}",
                    request.participant_id, formed.match_id, waited
                );
            }
            Ok(MatchOutcome::TimedOut { .. }) => {
                self.update_stats(|s| s.timed_out += 1);
                self.record_outcome("timeout", waited);
                info!(
                    "Participant {} timed out at table {} level {}",
                    request.participant_id, request.table, request.level
                );
            }
            Ok(MatchOutcome::Superseded) => {
                self.update_stats(|s| s.superseded += 1);
                self.record_outcome("superseded", waited);
                debug!(
                    "Request from participant {} superseded by a newer one",
                    request.participant_id
                );
            }
            Err(e) => {
                if matches!(classify(e), Some(MatchmakingError::StoreUnavailable { .. })) {
                    self.update_stats(|s| s.store_errors += 1);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_store_error("wait");
                    }
                    self.record_outcome("store_unavailable", waited);
                }
                error!(
                    "Match request from participant {} failed: {}",
                    request.participant_id, e
                );
            }
        }

        result
    }

    async fn wait_for_match(&self, request: MatchRequest, started: Instant) -> Result<MatchOutcome> {
        let participant_id = request.participant_id;
        let deadline = started + self.config.wait_timeout;

        // Subscribe before enqueueing so no notice can slip between the two
        let mut subscription = match self.config.mode {
            WaitMode::Notify => Some(self.notifier.subscribe(&window_topics(
                request.table,
                request.level,
                self.matcher.config().level_window,
            ))?),
            WaitMode::Polling => None,
        };

        let mut pending = self.enqueue(&request).await?;
        let mut guard = PendingGuard::new(self.store.clone(), participant_id, pending.ticket);

        loop {
            if let Some(formed) = self.store.take_result(participant_id).await? {
                guard.disarm();
                // Formed from an earlier request; the one just queued is surplus
                self.store.cancel(participant_id, Some(pending.ticket)).await?;
                return Ok(MatchOutcome::Matched(formed));
            }

            let timer = Instant::now();
            let attempt = self.matcher.attempt_match(&pending).await?;
            let retry_now = match attempt {
                MatchAttempt::Matched(formed) => {
                    self.record_attempt("matched", timer);
                    guard.disarm();
                    self.settle_own_result(participant_id).await;
                    self.announce_match(&formed);
                    return Ok(MatchOutcome::Matched(formed));
                }
                MatchAttempt::NoMatchYet(NoMatchReason::RaceLost) => {
                    self.record_attempt("race_lost", timer);
                    true
                }
                MatchAttempt::NoMatchYet(NoMatchReason::NotEnoughCandidates) => {
                    self.record_attempt("not_enough_candidates", timer);
                    false
                }
            };

            match self.store.refresh(participant_id, pending.ticket).await? {
                RefreshOutcome::Refreshed => {}
                RefreshOutcome::Superseded => {
                    guard.disarm();
                    return Ok(MatchOutcome::Superseded);
                }
                RefreshOutcome::Gone => {
                    // Claimed between the result check and now, or expired
                    if let Some(formed) = self.store.take_result(participant_id).await? {
                        guard.disarm();
                        return Ok(MatchOutcome::Matched(formed));
                    }
                    if Instant::now() >= deadline {
                        guard.disarm();
                        break;
                    }

                    debug!(
                        "Request for participant {} expired while waiting, re-enqueueing",
                        participant_id
                    );
                    self.update_stats(|s| s.reenqueued += 1);
                    pending = self.enqueue(&request).await?;
                    guard.rearm(pending.ticket);
                    continue;
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            if retry_now {
                continue;
            }

            if self.suspend(subscription.as_mut(), deadline).await {
                debug!(
                    "Notice stream ended for participant {}, falling back to polling",
                    participant_id
                );
                subscription = None;
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        drop(subscription);

        if guard.is_armed() {
            self.store.cancel(participant_id, Some(pending.ticket)).await?;
            guard.disarm();
        }

        // A claim may have landed right before the cancel
        if let Some(formed) = self.store.take_result(participant_id).await? {
            return Ok(MatchOutcome::Matched(formed));
        }

        Ok(MatchOutcome::TimedOut {
            waited: started.elapsed(),
        })
    }

    /// Sleep until the next check; returns true if the notice stream ended
    async fn suspend(&self, subscription: Option<&mut Subscription>, deadline: Instant) -> bool {
        let now = Instant::now();

        let Some(subscription) = subscription else {
            sleep_until((now + self.config.poll_interval).min(deadline)).await;
            return false;
        };

        let wake = (now + self.config.recheck_interval).min(deadline);
        tokio::select! {
            notice = subscription.next() => match notice {
                Some(notice) => {
                    debug!("Woken by notice {:?}", notice);
                    false
                }
                None => true,
            },
            _ = sleep_until(wake) => false,
        }
    }

    async fn enqueue(&self, request: &MatchRequest) -> Result<PendingRequest> {
        let pending = self
            .store
            .enqueue(
                request.participant_id,
                request.table,
                request.level,
                self.config.request_ttl,
            )
            .await?;

        if let Err(e) = self.notifier.announce_arrival(&pending) {
            warn!(
                "Failed to announce arrival of participant {}: {}",
                pending.participant_id, e
            );
        }

        Ok(pending)
    }

    /// Drop the result the store settled for the caller itself
    async fn settle_own_result(&self, participant_id: ParticipantId) {
        if let Err(e) = self.store.take_result(participant_id).await {
            warn!(
                "Failed to clear own result for participant {}: {}",
                participant_id, e
            );
        }
    }

    /// Publish the match event and hand the record to the recorder
    fn announce_match(&self, formed: &Match) {
        self.update_stats(|s| s.matches_announced += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_match_formed(formed.size());
        }

        match self.notifier.publish_match(&MatchEvent::from(formed)) {
            Ok(delivered) => debug!(
                "Match {} announced with {} deliveries",
                formed.match_id, delivered
            ),
            Err(e) => warn!("Failed to publish match {}: {}", formed.match_id, e),
        }

        let recorder = self.recorder.clone();
        let metrics = self.metrics.clone();
        let stats = self.stats.clone();
        let record = MatchRecord::from(formed);

        tokio::spawn(async move {
            let match_id = record.match_id;
            let result = recorder.record(record).await;

            if let Some(metrics) = &metrics {
                metrics.record_recorder_result(recorder.name(), result.is_ok());
            }

            if let Err(e) = result {
                warn!(
                    "Recorder {} failed for match {}: {}",
                    recorder.name(),
                    match_id,
                    e
                );
                if let Ok(mut stats) = stats.write() {
                    stats.recorder_failures += 1;
                }
            }
        });
    }

    fn record_attempt(&self, result: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_attempt(result, started.elapsed());
        }
    }

    fn record_outcome(&self, outcome: &str, waited: std::time::Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.record_wait_outcome(outcome, waited);
        }
    }

    fn update_stats(&self, update: impl FnOnce(&mut CoordinatorStats)) {
        match self.stats.write() {
            Ok(mut stats) => update(&mut stats),
            Err(_) => warn!("Failed to acquire coordinator stats lock"),
        }
    }
}
