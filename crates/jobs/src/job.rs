//! Job data model and the observable tracker state.
//!
//! A [`Job`] is one logical submission. It is created by
//! [`JobTracker::submit`](crate::JobTracker::submit), mutated only by the
//! tracker's driver task, and frozen once it reaches a terminal status.

use apollo_core::types::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::JobError;

/// Local identity of a job. Distinct from the backend token, which does
/// not exist until `start` succeeds.
pub type JobId = Uuid;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    /// `start` is in flight or being retried.
    Submitting,
    /// A token was issued; `query` is being polled.
    Polling,
    /// The backend reported completion; `end` is in flight.
    Completing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` are terminal; nothing leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the job is still doing network work.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Submitting | JobStatus::Polling | JobStatus::Completing
        )
    }
}

/// One in-flight or finished generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    /// Backend-issued token. `None` while submitting, and after a failed
    /// submission that never obtained one.
    pub token: Option<String>,
    pub payload: Value,
    pub status: JobStatus,
    /// Consecutive transport failures since the last successful response.
    pub attempt: u32,
    /// Last numeric progress reported by the backend, if any.
    pub progress: Option<f64>,
    pub result: Option<Value>,
    pub error: Option<JobError>,
    pub created_at: Timestamp,
    pub last_polled_at: Option<Timestamp>,
}

impl Job {
    /// A fresh job about to be submitted.
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: None,
            payload,
            status: JobStatus::Submitting,
            attempt: 0,
            progress: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            last_polled_at: None,
        }
    }

    /// A job rebuilt from a persisted token; polling starts immediately.
    pub fn resumed(token: String, payload: Value, created_at: Timestamp) -> Self {
        Self {
            token: Some(token),
            status: JobStatus::Polling,
            created_at,
            ..Self::new(payload)
        }
    }

    /// Record a transport failure.
    pub(crate) fn record_failure(&mut self) {
        self.attempt += 1;
    }

    /// Record any successful response from the backend.
    pub(crate) fn record_success(&mut self) {
        self.attempt = 0;
    }

    pub(crate) fn start_polling(&mut self, token: String) {
        self.token = Some(token);
        self.status = JobStatus::Polling;
        self.record_success();
    }

    pub(crate) fn complete(&mut self, result: Value) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.error = None;
    }

    pub(crate) fn fail(&mut self, error: JobError) {
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.result = None;
    }
}

/// Everything a caller renders from a tracker: `{ is_loading, result,
/// error, generation_count }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerState {
    /// The current job, or `None` when idle (never submitted, or cancelled).
    pub job: Option<Job>,
    /// Number of jobs this tracker has completed successfully.
    pub generation_count: u64,
}

impl TrackerState {
    pub fn status(&self) -> JobStatus {
        self.job.as_ref().map_or(JobStatus::Idle, |j| j.status)
    }

    pub fn is_loading(&self) -> bool {
        self.status().is_active()
    }

    pub fn result(&self) -> Option<&Value> {
        self.job.as_ref().and_then(|j| j.result.as_ref())
    }

    pub fn error(&self) -> Option<&JobError> {
        self.job.as_ref().and_then(|j| j.error.as_ref())
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job.as_ref().map(|j| j.id)
    }

    pub fn token(&self) -> Option<&str> {
        self.job.as_ref().and_then(|j| j.token.as_deref())
    }
}
