//! The three operations a tracker needs from the job service.
//!
//! [`JobTracker`](crate::JobTracker) knows nothing about endpoints, auth
//! headers or base URLs. It is handed a [`JobBackend`] and calls it. The
//! HTTP implementation lives in [`crate::api`]; tests inject scripted
//! fakes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BackendError;
use crate::messages::{EndResponse, QueryResponse, StartResponse};

#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Queue a new job and obtain its token.
    async fn start(&self, payload: &Value) -> Result<StartResponse, BackendError>;

    /// Ask for the current status of a job.
    async fn query(&self, token: &str) -> Result<QueryResponse, BackendError>;

    /// Fetch the final payload of a completed job.
    async fn end(&self, token: &str) -> Result<EndResponse, BackendError>;
}

#[async_trait]
impl<B: JobBackend + ?Sized> JobBackend for Arc<B> {
    async fn start(&self, payload: &Value) -> Result<StartResponse, BackendError> {
        (**self).start(payload).await
    }

    async fn query(&self, token: &str) -> Result<QueryResponse, BackendError> {
        (**self).query(token).await
    }

    async fn end(&self, token: &str) -> Result<EndResponse, BackendError> {
        (**self).end(token).await
    }
}
