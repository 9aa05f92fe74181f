//! Asynchronous generation job protocol.
//!
//! Drives one generation request through `start -> query -> end` against
//! the backend job service: bounded submission retries, progress polling
//! with backoff, a wall-clock timeout, exactly-once finalization and
//! first-class cancellation. Feature forms configure a [`JobTracker`]
//! per slot (usually via [`SlotManager`]) instead of carrying their own
//! polling loops.

pub mod api;
pub mod backend;
pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod job;
pub mod manager;
pub mod messages;
pub mod store;
pub mod tracker;

pub use api::JobServiceApi;
pub use backend::JobBackend;
pub use config::{ServiceConfig, TrackerConfig};
pub use error::{BackendError, JobError, TrackerError};
pub use events::TrackerEvent;
pub use history::GenerationHistory;
pub use job::{Job, JobId, JobStatus, TrackerState};
pub use manager::SlotManager;
pub use store::{FileTokenStore, MemoryTokenStore, PersistedToken, TokenStore};
pub use tracker::JobTracker;
