//! Error taxonomy for the job protocol.
//!
//! Three layers:
//!
//! - [`BackendError`] -- a single request to the job service failed
//!   (transport, non-2xx, undecodable body). Retried locally.
//! - [`JobError`] -- the terminal reason a job ended in `Failed`. Stored
//!   on the job and shown to the caller, so it is `Clone` + `Serialize`.
//! - [`TrackerError`] -- the caller used the tracker incorrectly.

use apollo_core::error::CoreError;
use serde::Serialize;

/// Errors from a single call to the job service.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The job service returned a non-2xx status code.
    #[error("Job service error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body was not the expected shape.
    #[error("Undecodable response: {0}")]
    Decode(String),
}

/// Terminal failure of a job.
///
/// Every variant carries the last raw response or error text so the
/// caller can log it next to the retry prompt.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
    /// `start` kept failing until the retry budget ran out.
    #[error("Submission failed after {attempts} attempts: {last_error}")]
    SubmissionExhausted { attempts: u32, last_error: String },

    /// `query` kept failing (transport errors) until the retry budget ran out.
    #[error("Status polling failed after {attempts} attempts: {last_error}")]
    PollExhausted { attempts: u32, last_error: String },

    /// The job service explicitly reported the job as failed.
    #[error("Job service reported an error: {response}")]
    JobReportedError { response: serde_json::Value },

    /// The job completed but its result was missing or unparseable.
    #[error("Malformed result: {reason}")]
    MalformedResult {
        reason: String,
        response: serde_json::Value,
    },

    /// The job did not reach a terminal state within the maximum wait.
    #[error("Job did not complete within {waited_secs}s")]
    Timeout { waited_secs: u64 },
}

impl JobError {
    /// Stable machine-readable name of the variant.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::SubmissionExhausted { .. } => "SUBMISSION_EXHAUSTED",
            JobError::PollExhausted { .. } => "POLL_EXHAUSTED",
            JobError::JobReportedError { .. } => "JOB_REPORTED_ERROR",
            JobError::MalformedResult { .. } => "MALFORMED_RESULT",
            JobError::Timeout { .. } => "TIMEOUT",
        }
    }
}

/// Errors returned to callers of [`JobTracker`](crate::JobTracker) and
/// [`SlotManager`](crate::SlotManager).
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A job for this slot is still submitting, polling or finalizing.
    #[error("A job is already in flight for this slot")]
    Busy,

    /// The tracker was shut down and accepts no more work.
    #[error("Tracker has been shut down")]
    ShutDown,

    /// No tracker is registered for the given slot.
    #[error("No tracker registered for slot '{0}'")]
    UnknownSlot(String),

    /// A domain-level error from `apollo_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The token store could not be read or written.
    #[error("Token store error: {0}")]
    Store(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_error_serializes_with_kind_tag() {
        let err = JobError::SubmissionExhausted {
            attempts: 5,
            last_error: "connection refused".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "submission_exhausted");
        assert_eq!(json["attempts"], 5);
        assert_eq!(json["last_error"], "connection refused");
    }

    #[test]
    fn job_error_display_includes_context() {
        let err = JobError::Timeout { waited_secs: 600 };
        assert_eq!(err.to_string(), "Job did not complete within 600s");
        assert_eq!(err.code(), "TIMEOUT");
    }

    #[test]
    fn backend_api_error_display() {
        let err = BackendError::Api {
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "Job service error (502): bad gateway");
    }
}
