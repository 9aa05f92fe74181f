//! Shared fixtures for the job tracker integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apollo_jobs::backoff::PollBackoff;
use apollo_jobs::messages::{EndResponse, QueryResponse, StartResponse};
use apollo_jobs::{BackendError, JobBackend, TrackerConfig};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

/// A scripted reply from the fake job service.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    /// Non-2xx with this status code.
    Status(u16),
}

#[derive(Default)]
struct Endpoint {
    replies: VecDeque<Reply>,
    last: Option<Reply>,
    calls: usize,
}

impl Endpoint {
    fn next(&mut self) -> Result<Value, BackendError> {
        self.calls += 1;
        if let Some(reply) = self.replies.pop_front() {
            self.last = Some(reply);
        }
        match self.last.clone() {
            Some(Reply::Json(body)) => Ok(body),
            Some(Reply::Status(status)) => Err(BackendError::Api {
                status,
                body: format!("scripted {status}"),
            }),
            None => Err(BackendError::Api {
                status: 500,
                body: "no reply scripted".into(),
            }),
        }
    }
}

#[derive(Default)]
struct Endpoints {
    start: Endpoint,
    query: Endpoint,
    end: Endpoint,
}

/// In-process stand-in for the job service.
///
/// Each endpoint replays its replies in order and repeats the last one.
/// With [`gate_queries`](Self::gate_queries), every `query` call blocks
/// until [`release_query`](Self::release_query) hands out a permit,
/// which simulates a poll whose response arrives late. With
/// [`slow_end`](Self::slow_end), `end` answers only after a delay.
#[derive(Clone, Default)]
pub struct FakeJobService {
    endpoints: Arc<Mutex<Endpoints>>,
    query_gate: Option<Arc<Semaphore>>,
    end_delay: Option<Duration>,
}

impl FakeJobService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.endpoints.lock().unwrap().start.replies = replies.into_iter().collect();
        self
    }

    pub fn on_query(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.endpoints.lock().unwrap().query.replies = replies.into_iter().collect();
        self
    }

    pub fn on_end(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.endpoints.lock().unwrap().end.replies = replies.into_iter().collect();
        self
    }

    pub fn gate_queries(mut self) -> Self {
        self.query_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn slow_end(mut self, delay: Duration) -> Self {
        self.end_delay = Some(delay);
        self
    }

    pub fn release_query(&self) {
        if let Some(gate) = &self.query_gate {
            gate.add_permits(1);
        }
    }

    pub fn start_calls(&self) -> usize {
        self.endpoints.lock().unwrap().start.calls
    }

    pub fn query_calls(&self) -> usize {
        self.endpoints.lock().unwrap().query.calls
    }

    pub fn end_calls(&self) -> usize {
        self.endpoints.lock().unwrap().end.calls
    }

    pub fn total_calls(&self) -> usize {
        self.start_calls() + self.query_calls() + self.end_calls()
    }
}

#[async_trait]
impl JobBackend for FakeJobService {
    async fn start(&self, _payload: &Value) -> Result<StartResponse, BackendError> {
        let body = self.endpoints.lock().unwrap().start.next()?;
        serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn query(&self, _token: &str) -> Result<QueryResponse, BackendError> {
        if let Some(gate) = &self.query_gate {
            let permit = gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        let body = self.endpoints.lock().unwrap().query.next()?;
        Ok(QueryResponse::from_value(body))
    }

    async fn end(&self, _token: &str) -> Result<EndResponse, BackendError> {
        if let Some(delay) = self.end_delay {
            tokio::time::sleep(delay).await;
        }
        let body = self.endpoints.lock().unwrap().end.next()?;
        Ok(EndResponse::from_value(body))
    }
}

pub fn json(value: Value) -> Reply {
    Reply::Json(value)
}

/// Config with millisecond delays; timers still run on tokio's paused
/// clock in most tests.
pub fn fast_config() -> TrackerConfig {
    TrackerConfig {
        retry_delay: Duration::from_millis(100),
        poll_backoff: PollBackoff::Exponential {
            initial: Duration::from_millis(100),
            multiplier: 1.5,
            max: Duration::from_millis(500),
        },
        ..TrackerConfig::default()
    }
}
