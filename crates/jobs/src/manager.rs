//! Multi-slot job manager.
//!
//! [`SlotManager`] owns one [`JobTracker`] per UI slot (typically one per
//! job kind or form). Submitting to a busy slot supersedes the job that
//! is in flight there.
//!
//! With a [`TokenStore`] attached, every slot gets a listener task that
//! saves the token as soon as it is issued and clears it once the job
//! completes, fails or is cancelled. [`SlotManager::resume`] and
//! [`SlotManager::resume_all`] pick saved jobs back up after a restart.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use apollo_core::types::SlotKey;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TrackerError;
use crate::events::TrackerEvent;
use crate::job::{JobId, TrackerState};
use crate::store::{PersistedToken, TokenStore};
use crate::tracker::JobTracker;

/// How long `shutdown` waits for each driver task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Routes submissions to per-slot trackers.
pub struct SlotManager {
    slots: RwLock<HashMap<SlotKey, ManagedSlot>>,
    store: Option<Arc<dyn TokenStore>>,
}

/// Internal bookkeeping for a single slot.
struct ManagedSlot {
    tracker: Arc<JobTracker>,
    /// Token persistence task; `None` without a store.
    listener: Option<JoinHandle<()>>,
    /// Tells the listener to exit once it has drained pending events.
    stop: CancellationToken,
}

impl Default for SlotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotManager {
    /// A manager without token persistence.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// A manager that persists tokens to `store`.
    pub fn with_store(store: Arc<dyn TokenStore>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            store: Some(store),
        }
    }

    /// Register `tracker` under `slot`.
    ///
    /// A tracker already registered for the slot is cancelled and
    /// replaced.
    pub async fn register(&self, slot: impl Into<SlotKey>, tracker: JobTracker) -> Arc<JobTracker> {
        let slot = slot.into();
        let tracker = Arc::new(tracker);
        let stop = CancellationToken::new();
        let listener = self.store.as_ref().map(|store| {
            tokio::spawn(persist_tokens(
                slot.clone(),
                Arc::clone(store),
                Arc::downgrade(&tracker),
                tracker.subscribe(),
                stop.clone(),
            ))
        });

        let previous = self.slots.write().await.insert(
            slot.clone(),
            ManagedSlot {
                tracker: Arc::clone(&tracker),
                listener,
                stop,
            },
        );

        if let Some(previous) = previous {
            tracing::info!(slot = %slot, "Replacing registered tracker");
            previous.stop.cancel();
            if let Some(listener) = previous.listener {
                listener.abort();
            }
            previous.tracker.cancel().await;
            if let Some(store) = &self.store {
                if let Err(e) = store.clear(&slot).await {
                    tracing::warn!(slot = %slot, error = %e, "Failed to clear replaced token");
                }
            }
        }

        tracing::debug!(slot = %slot, label = %tracker.label(), "Tracker registered");
        tracker
    }

    /// The tracker registered for `slot`.
    pub async fn tracker(&self, slot: &str) -> Result<Arc<JobTracker>, TrackerError> {
        self.slots
            .read()
            .await
            .get(slot)
            .map(|managed| Arc::clone(&managed.tracker))
            .ok_or_else(|| TrackerError::UnknownSlot(slot.to_string()))
    }

    /// Registered slot keys, sorted.
    pub async fn slots(&self) -> Vec<SlotKey> {
        let mut keys: Vec<_> = self.slots.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Submit `payload` to `slot`, cancelling any job still in flight
    /// there first.
    pub async fn submit(&self, slot: &str, payload: Value) -> Result<JobId, TrackerError> {
        let tracker = self.tracker(slot).await?;
        if tracker.is_loading() && tracker.cancel().await {
            tracing::info!(slot = %slot, "Superseded in-flight job");
        }
        tracker.submit(payload).await
    }

    /// Cancel the in-flight job of `slot`. Returns `false` if nothing
    /// was in flight.
    pub async fn cancel(&self, slot: &str) -> Result<bool, TrackerError> {
        Ok(self.tracker(slot).await?.cancel().await)
    }

    pub async fn state(&self, slot: &str) -> Result<TrackerState, TrackerError> {
        Ok(self.tracker(slot).await?.state())
    }

    /// Resume the persisted token of `slot`, if there is one.
    ///
    /// Returns `true` if a saved job was picked up.
    pub async fn resume(&self, slot: &str) -> Result<bool, TrackerError> {
        let tracker = self.tracker(slot).await?;
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(token) = store.load(slot).await? else {
            return Ok(false);
        };
        Ok(resume_saved(slot, &tracker, token).await)
    }

    /// Resume every persisted token whose slot is registered.
    ///
    /// Tokens for slots this manager does not know are left in the store;
    /// another process may own them. Returns the number of jobs resumed.
    pub async fn resume_all(&self) -> Result<usize, TrackerError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let saved = store.list().await?;
        tracing::info!(count = saved.len(), "Resuming persisted jobs");

        let mut resumed = 0;
        for (slot, token) in saved {
            let Ok(tracker) = self.tracker(&slot).await else {
                tracing::warn!(slot = %slot, token = %token.token, "Keeping token for unregistered slot");
                continue;
            };
            if resume_saved(&slot, &tracker, token).await {
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Stop every slot.
    ///
    /// Tokens of jobs still polling are kept in the store so the next
    /// process can resume them.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down slot manager");
        let drained: Vec<_> = self.slots.write().await.drain().collect();

        let stops = drained
            .into_iter()
            .map(|(slot, managed)| self.stop_slot(slot, managed));
        join_all(stops).await;

        tracing::info!("Slot manager shut down complete");
    }

    // ---- private helpers ----

    async fn stop_slot(&self, slot: SlotKey, managed: ManagedSlot) {
        tracing::debug!(slot = %slot, "Stopping tracker");
        let in_flight = managed.tracker.persist_token();
        managed.tracker.shutdown(SHUTDOWN_GRACE).await;

        managed.stop.cancel();
        if let Some(listener) = managed.listener {
            if tokio::time::timeout(SHUTDOWN_GRACE, listener).await.is_err() {
                tracing::warn!(slot = %slot, "Token listener did not stop in time");
            }
        }

        // The listener cleared the token on the shutdown's `Cancelled`.
        if let (Some(store), Some(token)) = (&self.store, in_flight) {
            if let Err(e) = store.save(&slot, &token).await {
                tracing::error!(slot = %slot, error = %e, "Failed to keep token on shutdown");
            }
        }
    }
}

async fn resume_saved(slot: &str, tracker: &JobTracker, token: PersistedToken) -> bool {
    match tracker.resume_from_token(token).await {
        Ok(job_id) => {
            tracing::info!(slot = %slot, job_id = %job_id, "Resumed persisted job");
            true
        }
        Err(e) => {
            tracing::warn!(slot = %slot, error = %e, "Failed to resume job");
            false
        }
    }
}

/// Mirror token lifecycle events of one slot into the store.
async fn persist_tokens(
    slot: SlotKey,
    store: Arc<dyn TokenStore>,
    tracker: Weak<JobTracker>,
    mut receiver: broadcast::Receiver<TrackerEvent>,
    stop: CancellationToken,
) {
    loop {
        // Pending events are drained before honouring `stop`.
        let received = tokio::select! {
            biased;
            received = receiver.recv() => received,
            _ = stop.cancelled() => break,
        };
        let event = match received {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(slot = %slot, skipped = n, "Token listener lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let result = match &event {
            TrackerEvent::TokenIssued { .. } => {
                // `None` once the job has already moved past polling.
                match tracker.upgrade().and_then(|t| t.persist_token()) {
                    Some(token) => store.save(&slot, &token).await,
                    None => Ok(()),
                }
            }
            event if event.is_final() => store.clear(&slot).await,
            _ => Ok(()),
        };

        if let Err(e) = result {
            tracing::error!(slot = %slot, error = %e, "Failed to update token store");
        }
    }
}
