//! [`JobTracker`] -- drives one job at a time through
//! `submit -> poll -> finalize`.
//!
//! Each accepted submission spawns a single driver task. The driver
//! issues one request at a time and only issues the next after the
//! previous one resolved, so polls never overlap and `end` can only be
//! reached once per job.
//!
//! All writes to the observable [`TrackerState`] go through
//! [`Shared::update`], which only applies a change while the job it was
//! computed for is still the tracker's current, non-terminal job. A
//! cancelled or superseded driver can therefore never touch state, even
//! if one of its responses lands after the cancellation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::JobBackend;
use crate::config::TrackerConfig;
use crate::error::{JobError, TrackerError};
use crate::events::TrackerEvent;
use crate::job::{Job, JobId, JobStatus, TrackerState};
use crate::messages::JobProgress;
use crate::store::PersistedToken;

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Turns the `response` field of an `end` body into the final result.
pub type ResultParser = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Called once with the result of every job that completes.
pub type EndResponseHook = Arc<dyn Fn(&Value) + Send + Sync>;

/// Owns the lifecycle of one generation slot.
///
/// Dropping the tracker cancels whatever job it is driving.
pub struct JobTracker {
    shared: Arc<Shared>,
    /// Driver bookkeeping for the current job. Also serialises
    /// `submit`/`cancel` against each other.
    active: Mutex<Option<ActiveJob>>,
    /// Parent of every per-job cancellation token.
    root: CancellationToken,
}

/// State shared between the tracker handle and its driver tasks.
struct Shared {
    label: String,
    backend: Arc<dyn JobBackend>,
    config: TrackerConfig,
    parser: ResultParser,
    on_end_response: Option<EndResponseHook>,
    state_tx: watch::Sender<TrackerState>,
    event_tx: broadcast::Sender<TrackerEvent>,
}

struct ActiveJob {
    id: JobId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Where a driver begins.
enum Start {
    Submit(Value),
    Resume(String),
}

/// Why a driver stopped before completing.
enum Stop {
    Failed(JobError),
    /// The job is no longer the tracker's current job.
    Superseded,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures a [`JobTracker`] before it starts accepting submissions.
pub struct JobTrackerBuilder {
    label: String,
    backend: Arc<dyn JobBackend>,
    config: TrackerConfig,
    parser: Option<ResultParser>,
    on_end_response: Option<EndResponseHook>,
}

impl JobTrackerBuilder {
    /// Name used in log lines, usually the job kind or slot key.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Replace the configured [`ResultFormat`](crate::messages::ResultFormat)
    /// with a custom parse/validate step.
    pub fn result_parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Register the callback invoked with every completed result.
    pub fn on_end_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_end_response = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> JobTracker {
        let format = self.config.result_format;
        let parser: ResultParser = match self.parser {
            Some(parser) => parser,
            None => Arc::new(move |value: Value| format.parse(value)),
        };
        let (state_tx, _) = watch::channel(TrackerState::default());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        JobTracker {
            shared: Arc::new(Shared {
                label: self.label,
                backend: self.backend,
                config: self.config,
                parser,
                on_end_response: self.on_end_response,
                state_tx,
                event_tx,
            }),
            active: Mutex::new(None),
            root: CancellationToken::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// JobTracker
// ---------------------------------------------------------------------------

impl JobTracker {
    /// A tracker with default options.
    pub fn new<B: JobBackend + 'static>(backend: B, config: TrackerConfig) -> Self {
        Self::builder(backend, config).build()
    }

    pub fn builder<B: JobBackend + 'static>(backend: B, config: TrackerConfig) -> JobTrackerBuilder {
        JobTrackerBuilder {
            label: "job".to_string(),
            backend: Arc::new(backend),
            config,
            parser: None,
            on_end_response: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.shared.config
    }

    /// Start a new job for `payload`.
    ///
    /// Returns immediately with the new job's id; the work happens on a
    /// spawned task. Fails with [`TrackerError::Busy`] while the current
    /// job is still submitting, polling or finalizing -- cancel it first
    /// to supersede it.
    pub async fn submit(&self, payload: Value) -> Result<JobId, TrackerError> {
        let job = Job::new(payload.clone());
        self.launch(job, Start::Submit(payload)).await
    }

    /// Resume polling a job whose token was saved with
    /// [`persist_token`](Self::persist_token), e.g. after a restart.
    pub async fn resume_from_token(&self, saved: PersistedToken) -> Result<JobId, TrackerError> {
        let token = saved.token.clone();
        let job = Job::resumed(saved.token, saved.payload, saved.created_at);
        self.launch(job, Start::Resume(token)).await
    }

    /// Everything needed to resume the current job later, or `None` if
    /// there is no job with a live token.
    pub fn persist_token(&self) -> Option<PersistedToken> {
        let state = self.shared.state_tx.borrow();
        let job = state.job.as_ref()?;
        if !matches!(job.status, JobStatus::Polling | JobStatus::Completing) {
            return None;
        }
        Some(PersistedToken {
            token: job.token.clone()?,
            payload: job.payload.clone(),
            created_at: job.created_at,
        })
    }

    /// Cancel the in-flight job.
    ///
    /// Stops all further requests and retries for it and discards its
    /// token; the tracker returns to idle. Responses that were already on
    /// the wire are ignored. Returns `false` if there was nothing to
    /// cancel (idle, or the job had already finished).
    pub async fn cancel(&self) -> bool {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(current) => {
                current.cancel.cancel();
                self.discard(current.id)
            }
            None => false,
        }
    }

    /// Cancel the current job, refuse further work and wait up to `grace`
    /// for the driver task to exit.
    pub async fn shutdown(&self, grace: Duration) {
        self.root.cancel();
        let current = self.active.lock().await.take();
        if let Some(current) = current {
            self.discard(current.id);
            if tokio::time::timeout(grace, current.handle).await.is_err() {
                tracing::warn!(label = %self.shared.label, "Job driver did not stop in time");
            }
        }
    }

    /// Snapshot of the observable state.
    pub fn state(&self) -> TrackerState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state_tx.borrow().is_loading()
    }

    pub fn result(&self) -> Option<Value> {
        self.shared.state_tx.borrow().result().cloned()
    }

    pub fn error(&self) -> Option<JobError> {
        self.shared.state_tx.borrow().error().cloned()
    }

    pub fn generation_count(&self) -> u64 {
        self.shared.state_tx.borrow().generation_count
    }

    /// Watch every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<TrackerState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Wait until the tracker is no longer loading and return the state.
    pub async fn wait(&self) -> TrackerState {
        let mut rx = self.shared.state_tx.subscribe();
        let settled = rx.wait_for(|state| !state.is_loading()).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| self.state())
    }

    // ---- private helpers ----

    /// Drop the job from the state if it is still in flight.
    fn discard(&self, job_id: JobId) -> bool {
        let mut discarded = None;
        self.shared.state_tx.send_if_modified(|state| match &state.job {
            Some(job) if job.id == job_id && !job.status.is_terminal() => {
                discarded = Some(job.token.clone());
                state.job = None;
                true
            }
            _ => false,
        });

        let Some(token) = discarded else {
            return false;
        };
        tracing::info!(
            label = %self.shared.label,
            job_id = %job_id,
            token = ?token,
            "Job cancelled",
        );
        self.shared.emit(TrackerEvent::Cancelled { job_id, token });
        true
    }

    async fn launch(&self, job: Job, start: Start) -> Result<JobId, TrackerError> {
        let mut active = self.active.lock().await;
        if self.root.is_cancelled() {
            return Err(TrackerError::ShutDown);
        }
        if self.is_loading() {
            return Err(TrackerError::Busy);
        }

        let job_id = job.id;
        let deadline = deadline_for(&job, self.shared.config.max_wait);
        self.shared.state_tx.send_modify(|state| state.job = Some(job));

        match &start {
            Start::Submit(_) => {
                tracing::info!(label = %self.shared.label, job_id = %job_id, "Job submitted");
                self.shared.emit(TrackerEvent::Submitted { job_id });
            }
            Start::Resume(token) => {
                tracing::info!(
                    label = %self.shared.label,
                    job_id = %job_id,
                    token = %token,
                    "Resuming job from saved token",
                );
                self.shared.emit(TrackerEvent::TokenIssued {
                    job_id,
                    token: token.clone(),
                });
            }
        }

        let cancel = self.root.child_token();
        let handle = tokio::spawn(drive(
            Arc::clone(&self.shared),
            job_id,
            start,
            deadline,
            cancel.clone(),
        ));

        *active = Some(ActiveJob {
            id: job_id,
            cancel,
            handle,
        });
        Ok(job_id)
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// How far ahead an effectively unbounded deadline is placed.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The instant after which a job still submitting or polling fails with
/// `Timeout`. Resumed jobs keep the budget they had left.
fn deadline_for(job: &Job, max_wait: Duration) -> Instant {
    let elapsed = (Utc::now() - job.created_at).to_std().unwrap_or_default();
    let now = Instant::now();
    now.checked_add(max_wait.saturating_sub(elapsed))
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

impl Shared {
    fn emit(&self, event: TrackerEvent) {
        // Zero receivers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Apply `f` to the job if it is still current and non-terminal.
    /// Returns `false` when the job was cancelled or superseded.
    fn update<F: FnOnce(&mut Job)>(&self, job_id: JobId, f: F) -> bool {
        self.state_tx.send_if_modified(|state| match state.job.as_mut() {
            Some(job) if job.id == job_id && !job.status.is_terminal() => {
                f(job);
                true
            }
            _ => false,
        })
    }

    /// Record a successful result and bump the generation counter.
    fn complete(&self, job_id: JobId, result: Value) -> bool {
        self.state_tx.send_if_modified(|state| match state.job.as_mut() {
            Some(job) if job.id == job_id && !job.status.is_terminal() => {
                job.complete(result);
                state.generation_count += 1;
                true
            }
            _ => false,
        })
    }

    /// Record a transport (or unrecognised-response) failure and return
    /// the new consecutive failure count.
    fn record_failure(&self, job_id: JobId) -> Result<u32, Stop> {
        let mut attempt = 0;
        let applied = self.update(job_id, |job| {
            job.record_failure();
            attempt = job.attempt;
        });
        if applied {
            Ok(attempt)
        } else {
            Err(Stop::Superseded)
        }
    }

    fn require(&self, applied: bool) -> Result<(), Stop> {
        if applied {
            Ok(())
        } else {
            Err(Stop::Superseded)
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run one job to a terminal state, unless cancelled first.
async fn drive(
    shared: Arc<Shared>,
    job_id: JobId,
    start: Start,
    deadline: Instant,
    cancel: CancellationToken,
) {
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(label = %shared.label, job_id = %job_id, "Driver stopped by cancellation");
            return;
        }
        outcome = run(&shared, job_id, start, deadline) => outcome,
    };

    match outcome {
        Ok((token, result)) => {
            if !shared.complete(job_id, result.clone()) {
                return;
            }
            tracing::info!(
                label = %shared.label,
                job_id = %job_id,
                token = %token,
                "Job completed",
            );
            if let Some(hook) = &shared.on_end_response {
                hook(&result);
            }
            shared.emit(TrackerEvent::Completed {
                job_id,
                token,
                result,
            });
        }
        Err(Stop::Failed(error)) => {
            if !shared.update(job_id, |job| job.fail(error.clone())) {
                return;
            }
            tracing::error!(
                label = %shared.label,
                job_id = %job_id,
                code = error.code(),
                error = %error,
                "Job failed",
            );
            shared.emit(TrackerEvent::Failed { job_id, error });
        }
        Err(Stop::Superseded) => {
            tracing::debug!(label = %shared.label, job_id = %job_id, "Driver superseded");
        }
    }
}

async fn run(
    shared: &Shared,
    job_id: JobId,
    start: Start,
    deadline: Instant,
) -> Result<(String, Value), Stop> {
    // The maximum wait covers submission and polling only.
    let token = match tokio::time::timeout_at(deadline, reach_completion(shared, job_id, start)).await {
        Ok(token) => token?,
        Err(_) => {
            return Err(Stop::Failed(JobError::Timeout {
                waited_secs: shared.config.max_wait.as_secs(),
            }));
        }
    };
    let result = finalize(shared, job_id, &token).await?;
    Ok((token, result))
}

/// Submit (unless resuming) and poll until the backend reports completion.
async fn reach_completion(shared: &Shared, job_id: JobId, start: Start) -> Result<String, Stop> {
    let token = match start {
        Start::Submit(payload) => submit_with_retry(shared, job_id, &payload).await?,
        Start::Resume(token) => token,
    };
    poll_until_complete(shared, job_id, &token).await?;
    Ok(token)
}

/// Call `start` until it yields a token or the retry budget runs out.
async fn submit_with_retry(shared: &Shared, job_id: JobId, payload: &Value) -> Result<String, Stop> {
    let max_retries = shared.config.max_retries.max(1);

    loop {
        let error = match shared.backend.start(payload).await {
            Ok(response) if !response.token.trim().is_empty() => {
                let token = response.token;
                shared.require(shared.update(job_id, |job| job.start_polling(token.clone())))?;
                tracing::info!(
                    label = %shared.label,
                    job_id = %job_id,
                    token = %token,
                    "Job accepted by backend",
                );
                shared.emit(TrackerEvent::TokenIssued {
                    job_id,
                    token: token.clone(),
                });
                return Ok(token);
            }
            Ok(_) => "start response carried an empty token".to_string(),
            Err(e) => e.to_string(),
        };

        let attempt = shared.record_failure(job_id)?;
        if attempt >= max_retries {
            return Err(Stop::Failed(JobError::SubmissionExhausted {
                attempts: attempt,
                last_error: error,
            }));
        }

        tracing::warn!(
            label = %shared.label,
            job_id = %job_id,
            attempt,
            delay_ms = shared.config.retry_delay.as_millis() as u64,
            error = %error,
            "Submission failed, retrying",
        );
        shared.emit(TrackerEvent::Retrying {
            job_id,
            attempt,
            error,
        });
        tokio::time::sleep(shared.config.retry_delay).await;
    }
}

/// Poll `query` until the backend reports completion.
async fn poll_until_complete(shared: &Shared, job_id: JobId, token: &str) -> Result<(), Stop> {
    let max_retries = shared.config.poll_max_retries.max(1);
    let mut schedule = shared.config.poll_backoff.schedule();

    loop {
        let error = match shared.backend.query(token).await {
            Ok(response) => match response.state {
                JobProgress::Pending { percent } => {
                    let delay = schedule.next_delay();
                    shared.require(shared.update(job_id, |job| {
                        job.record_success();
                        job.last_polled_at = Some(Utc::now());
                        if percent.is_some() {
                            job.progress = percent;
                        }
                    }))?;
                    tracing::debug!(
                        label = %shared.label,
                        job_id = %job_id,
                        percent = ?percent,
                        delay_ms = delay.as_millis() as u64,
                        "Job still in progress",
                    );
                    shared.emit(TrackerEvent::Progress {
                        job_id,
                        token: token.to_string(),
                        percent,
                        next_poll_in: delay,
                    });
                    tokio::time::sleep(delay).await;
                    continue;
                }
                JobProgress::Completed => {
                    shared.require(shared.update(job_id, |job| {
                        job.record_success();
                        job.last_polled_at = Some(Utc::now());
                        job.status = JobStatus::Completing;
                    }))?;
                    return Ok(());
                }
                JobProgress::Error => {
                    shared.require(shared.update(job_id, |job| {
                        job.record_success();
                        job.last_polled_at = Some(Utc::now());
                    }))?;
                    return Err(Stop::Failed(JobError::JobReportedError {
                        response: response.raw,
                    }));
                }
                JobProgress::Unrecognized => {
                    format!("unrecognized status response: {}", response.raw)
                }
            },
            Err(e) => e.to_string(),
        };

        let attempt = shared.record_failure(job_id)?;
        if attempt >= max_retries {
            return Err(Stop::Failed(JobError::PollExhausted {
                attempts: attempt,
                last_error: error,
            }));
        }

        tracing::warn!(
            label = %shared.label,
            job_id = %job_id,
            attempt,
            delay_ms = shared.config.retry_delay.as_millis() as u64,
            error = %error,
            "Status poll failed, retrying",
        );
        shared.emit(TrackerEvent::Retrying {
            job_id,
            attempt,
            error,
        });
        tokio::time::sleep(shared.config.retry_delay).await;
    }
}

/// Fetch and parse the result. Called at most once per job.
async fn finalize(shared: &Shared, job_id: JobId, token: &str) -> Result<Value, Stop> {
    let response = match shared.backend.end(token).await {
        Ok(response) => response,
        Err(e) => {
            return Err(Stop::Failed(JobError::MalformedResult {
                reason: format!("result fetch failed: {e}"),
                response: Value::Null,
            }));
        }
    };
    shared.require(shared.update(job_id, |job| job.record_success()))?;

    let Some(value) = response.response else {
        return Err(Stop::Failed(JobError::MalformedResult {
            reason: "response field is missing".to_string(),
            response: response.raw,
        }));
    };

    (shared.parser)(value).map_err(|reason| {
        Stop::Failed(JobError::MalformedResult {
            reason,
            response: response.raw,
        })
    })
}
