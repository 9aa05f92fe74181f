//! Lifecycle events emitted by a [`JobTracker`](crate::JobTracker).
//!
//! Broadcast so that the persistence layer (token store, generation
//! history) and any logging/UI glue can follow a job without polling
//! the tracker's state.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::JobError;
use crate::job::JobId;

/// A lifecycle change of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// `submit` accepted a payload; the first `start` call is going out.
    Submitted { job_id: JobId },

    /// The backend issued a token; polling begins.
    TokenIssued { job_id: JobId, token: String },

    /// A poll reported the job still running.
    Progress {
        job_id: JobId,
        token: String,
        /// Percentage when the backend reports one.
        percent: Option<f64>,
        /// Wait before the next poll.
        #[serde(with = "duration_ms")]
        next_poll_in: Duration,
    },

    /// A request failed and will be retried.
    Retrying {
        job_id: JobId,
        attempt: u32,
        error: String,
    },

    /// The job finished and its result was parsed.
    Completed {
        job_id: JobId,
        token: String,
        result: Value,
    },

    /// The job ended in `Failed`.
    Failed { job_id: JobId, error: JobError },

    /// The caller cancelled the job before it reached a terminal state.
    Cancelled {
        job_id: JobId,
        token: Option<String>,
    },
}

impl TrackerEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            TrackerEvent::Submitted { job_id }
            | TrackerEvent::TokenIssued { job_id, .. }
            | TrackerEvent::Progress { job_id, .. }
            | TrackerEvent::Retrying { job_id, .. }
            | TrackerEvent::Completed { job_id, .. }
            | TrackerEvent::Failed { job_id, .. }
            | TrackerEvent::Cancelled { job_id, .. } => *job_id,
        }
    }

    /// Whether no further events will follow for this job.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TrackerEvent::Completed { .. }
                | TrackerEvent::Failed { .. }
                | TrackerEvent::Cancelled { .. }
        )
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
