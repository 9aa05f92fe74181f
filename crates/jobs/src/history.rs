//! Bounded record of completed generations.
//!
//! [`GenerationHistory::run`] follows a tracker's event stream and keeps
//! the most recent results per slot, newest first, so a UI can offer
//! "previous versions" without asking the backend again.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use apollo_core::types::{SlotKey, Timestamp};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::events::TrackerEvent;
use crate::job::JobId;

/// Results kept per slot when no capacity is given.
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// One completed generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRecord {
    pub job_id: JobId,
    pub token: String,
    pub result: Value,
    pub completed_at: Timestamp,
}

/// Per-slot ring of the latest completed results.
#[derive(Clone)]
pub struct GenerationHistory {
    capacity: usize,
    entries: Arc<RwLock<HashMap<SlotKey, VecDeque<GenerationRecord>>>>,
}

impl Default for GenerationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl GenerationHistory {
    /// Keep up to `capacity` records per slot (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, slot: &str, record: GenerationRecord) {
        let mut entries = self.entries.write().await;
        let list = entries.entry(slot.to_string()).or_default();
        list.push_front(record);
        list.truncate(self.capacity);
    }

    /// Records for `slot`, newest first.
    pub async fn list(&self, slot: &str) -> Vec<GenerationRecord> {
        self.entries
            .read()
            .await
            .get(slot)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn latest(&self, slot: &str) -> Option<GenerationRecord> {
        self.entries
            .read()
            .await
            .get(slot)
            .and_then(|list| list.front().cloned())
    }

    pub async fn clear(&self, slot: &str) {
        self.entries.write().await.remove(slot);
    }

    /// Record every `Completed` event from `receiver` under `slot`.
    ///
    /// Exits when the channel closes, i.e. once the tracker and its
    /// driver tasks are gone.
    pub async fn run(&self, slot: SlotKey, mut receiver: broadcast::Receiver<TrackerEvent>) {
        loop {
            match receiver.recv().await {
                Ok(TrackerEvent::Completed {
                    job_id,
                    token,
                    result,
                }) => {
                    self.record(
                        &slot,
                        GenerationRecord {
                            job_id,
                            token,
                            result,
                            completed_at: Utc::now(),
                        },
                    )
                    .await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        slot = %slot,
                        skipped = n,
                        "Generation history lagged, some results were not recorded"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!(slot = %slot, "Event stream closed, history listener exiting");
                    break;
                }
            }
        }
    }
}
