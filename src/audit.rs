//! Match history recording
//!
//! Every formed match is handed to a [`MatchRecorder`] in a detached task.
//! Recording is fire-and-forget: a failed record is logged and counted but
//! never undoes the match.

use crate::error::{MatchmakingError, Result};
use crate::types::MatchRecord;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::info;

/// Trait for durable match history sinks
#[async_trait]
pub trait MatchRecorder: Send + Sync {
    /// Persist one formed match
    async fn record(&self, record: MatchRecord) -> Result<()>;

    /// Short name used in logs and health output
    fn name(&self) -> &'static str;
}

/// Recorder that only writes a structured log line
#[derive(Debug, Default)]
pub struct LoggingMatchRecorder;

#[async_trait]
impl MatchRecorder for LoggingMatchRecorder {
    async fn record(&self, record: MatchRecord) -> Result<()> {
        info!(
            match_id = %record.match_id,
            table = record.table,
            level = record.level,
            participants = ?record.participants,
            formed_at = %record.formed_at,
            "Match recorded"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Recorder keeping records in memory
#[derive(Debug, Default)]
pub struct InMemoryMatchRecorder {
    records: Mutex<Vec<MatchRecord>>,
    failing: AtomicBool,
}

impl InMemoryMatchRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder whose every call fails
    pub fn failing() -> Self {
        let recorder = Self::default();
        recorder.set_failing(true);
        recorder
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Get all recorded matches
    pub fn records(&self) -> Vec<MatchRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MatchRecorder for InMemoryMatchRecorder {
    async fn record(&self, record: MatchRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MatchmakingError::InternalError {
                message: format!("history sink rejected match {}", record.match_id),
            }
            .into());
        }

        let mut records = self
            .records
            .lock()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire records lock".to_string(),
            })?;
        records.push(record);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
