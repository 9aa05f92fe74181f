//! REST client for the generation job service.
//!
//! Every job kind exposes the same three endpoints under its own route
//! segment:
//!
//! | Call    | Request                          | Body              |
//! |---------|----------------------------------|-------------------|
//! | `start` | `POST {base}/{kind}/start`       | submission payload|
//! | `query` | `POST {base}/{kind}/query`       | `{"token": ...}`  |
//! | `end`   | `POST {base}/{kind}/end`         | `{"token": ...}`  |

use async_trait::async_trait;
use serde_json::Value;

use apollo_core::error::CoreError;
use apollo_core::job_kind::validate_job_kind;

use crate::backend::JobBackend;
use crate::config::ServiceConfig;
use crate::error::{BackendError, TrackerError};
use crate::messages::{EndResponse, QueryResponse, StartResponse};

/// HTTP client for one job kind on the job service.
#[derive(Debug, Clone)]
pub struct JobServiceApi {
    client: reqwest::Client,
    base_url: String,
    kind: String,
    auth_token: Option<String>,
}

impl JobServiceApi {
    /// Create a client for `kind` with its own connection pool.
    pub fn new(config: &ServiceConfig, kind: &str) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Self::with_client(client, config, kind)
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    /// (useful for sharing one pool across every job kind).
    pub fn with_client(
        client: reqwest::Client,
        config: &ServiceConfig,
        kind: &str,
    ) -> Result<Self, TrackerError> {
        validate_job_kind(kind)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            kind: kind.to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    fn url(&self, action: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.kind, action)
    }

    /// POST a JSON body and decode a JSON response.
    async fn post(&self, action: &str, body: &Value) -> Result<Value, BackendError> {
        let mut request = self.client.post(self.url(action)).json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<Value>().await?)
    }

    // ---- private helpers ----

    /// Returns the response unchanged on success, or a
    /// [`BackendError::Api`] containing the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl JobBackend for JobServiceApi {
    async fn start(&self, payload: &Value) -> Result<StartResponse, BackendError> {
        let raw = self.post("start", payload).await?;
        serde_json::from_value(raw.clone())
            .map_err(|e| BackendError::Decode(format!("start response {raw}: {e}")))
    }

    async fn query(&self, token: &str) -> Result<QueryResponse, BackendError> {
        let raw = self.post("query", &serde_json::json!({ "token": token })).await?;
        Ok(QueryResponse::from_value(raw))
    }

    async fn end(&self, token: &str) -> Result<EndResponse, BackendError> {
        let raw = self.post("end", &serde_json::json!({ "token": token })).await?;
        Ok(EndResponse::from_value(raw))
    }
}
