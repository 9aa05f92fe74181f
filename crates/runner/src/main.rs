//! `apollo-runner` -- submit one generation job and print its result.
//!
//! ```text
//! apollo-runner <kind> [payload.json]
//! ```
//!
//! The payload is read from stdin when no file is given. The result is
//! written to stdout as JSON; a failed job prints its error to stderr
//! and exits with status 1.
//!
//! # Environment variables
//!
//! | Variable                   | Required | Default       | Description                          |
//! |----------------------------|----------|---------------|--------------------------------------|
//! | `JOB_SERVICE_URL`          | yes      | --            | Base URL of the job service          |
//! | `JOB_SERVICE_AUTH_TOKEN`   | no       | --            | Bearer token sent with every request |
//! | `JOB_SERVICE_TIMEOUT_SECS` | no       | `30`          | Per-request HTTP timeout             |
//! | `JOB_TOKEN_FILE`           | no       | --            | Persist tokens so an interrupted run can resume |
//! | `JOB_*`                    | no       | see `TrackerConfig::from_env` | Retry, backoff and timeout tuning |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use apollo_core::job_kind::{is_image_kind, VALID_JOB_KINDS};
use apollo_jobs::{
    FileTokenStore, JobServiceApi, JobStatus, JobTracker, ServiceConfig, SlotManager,
    TrackerConfig, TrackerEvent,
};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status after Ctrl-C, matching shell convention for SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "apollo_runner=info,apollo_jobs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let kind = args.next().unwrap_or_else(|| {
        eprintln!("usage: apollo-runner <kind> [payload.json]");
        eprintln!("kinds: {}", VALID_JOB_KINDS.join(", "));
        std::process::exit(2);
    });
    let payload_path = args.next().map(PathBuf::from);

    match run(&kind, payload_path).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Runner failed");
            std::process::exit(1);
        }
    }
}

async fn run(kind: &str, payload_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let service =
        ServiceConfig::from_env().context("JOB_SERVICE_URL environment variable is required")?;
    let config = TrackerConfig::from_env();

    tracing::info!(
        kind,
        image = is_image_kind(kind),
        base_url = %service.base_url,
        max_retries = config.max_retries,
        max_wait_secs = config.max_wait.as_secs(),
        "Starting apollo-runner",
    );

    let api = JobServiceApi::new(&service, kind)?;
    let tracker = JobTracker::builder(api, config).label(kind).build();

    let manager = match std::env::var("JOB_TOKEN_FILE") {
        Ok(path) if !path.trim().is_empty() => {
            tracing::info!(path = %path, "Persisting job tokens");
            SlotManager::with_store(Arc::new(FileTokenStore::new(path)))
        }
        _ => SlotManager::new(),
    };
    let tracker = manager.register(kind, tracker).await;
    let logger = tokio::spawn(log_events(tracker.subscribe()));

    if manager.resume(kind).await? {
        tracing::info!(kind, "Resumed saved job instead of submitting a new one");
    } else {
        let payload = read_payload(payload_path).await?;
        manager.submit(kind, payload).await?;
    }

    let state = tokio::select! {
        state = tracker.wait() => state,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping");
            manager.shutdown().await;
            logger.abort();
            return Ok(EXIT_INTERRUPTED);
        }
    };

    let code = match (state.status(), state.result(), state.error()) {
        (JobStatus::Completed, Some(result), _) => {
            println!("{}", serde_json::to_string_pretty(result)?);
            0
        }
        (_, _, Some(error)) => {
            eprintln!("{}", serde_json::to_string_pretty(error)?);
            1
        }
        (status, _, _) => {
            tracing::error!(status = ?status, "Job ended without a result");
            1
        }
    };

    manager.shutdown().await;
    logger.abort();
    Ok(code)
}

/// Read the submission payload from `path`, or from stdin.
async fn read_payload(path: Option<PathBuf>) -> anyhow::Result<Value> {
    let text = match &path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read payload file {}", path.display()))?,
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read payload from stdin")?;
            text
        }
    };
    serde_json::from_str(&text).context("Payload is not valid JSON")
}

async fn log_events(mut receiver: broadcast::Receiver<TrackerEvent>) {
    loop {
        match receiver.recv().await {
            Ok(TrackerEvent::Progress {
                percent,
                next_poll_in,
                ..
            }) => {
                tracing::info!(
                    percent = ?percent,
                    next_poll_ms = next_poll_in.as_millis() as u64,
                    "Generation in progress",
                );
            }
            Ok(TrackerEvent::Retrying { attempt, error, .. }) => {
                tracing::info!(attempt, error = %error, "Retrying request");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "Event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
