//! Tracker and job-service configuration loaded from the environment.

use std::time::Duration;

use crate::backoff::{PollBackoff, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MULTIPLIER};
use crate::messages::ResultFormat;

/// Submission attempts before giving up with `SubmissionExhausted`.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Consecutive poll transport failures before giving up with `PollExhausted`.
pub const DEFAULT_POLL_MAX_RETRIES: u32 = 5;
/// Fixed wait after a transport failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);
/// Maximum wall-clock time from submission to a terminal state.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);
/// Per-request HTTP timeout for the job service.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Retry, backoff and timeout policy for a [`JobTracker`](crate::JobTracker).
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Total `start` calls allowed for one submission.
    pub max_retries: u32,
    /// Consecutive failed `query` calls allowed before failing the job.
    pub poll_max_retries: u32,
    /// Wait between retries after a transport failure.
    pub retry_delay: Duration,
    /// Wait between "still in progress" polls.
    pub poll_backoff: PollBackoff,
    /// Upper bound on total time since `submit`.
    pub max_wait: Duration,
    /// Parse step applied to the `end` response.
    pub result_format: ResultFormat,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            poll_max_retries: DEFAULT_POLL_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            poll_backoff: PollBackoff::default(),
            max_wait: DEFAULT_MAX_WAIT,
            result_format: ResultFormat::default(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Unparseable values fall back to the default and log a warning.
    /// So does a zero delay, which would otherwise poll in a tight loop.
    ///
    /// | Env Var                | Default       |
    /// |------------------------|---------------|
    /// | `JOB_MAX_RETRIES`      | `5`           |
    /// | `JOB_POLL_MAX_RETRIES` | `5`           |
    /// | `JOB_RETRY_DELAY_MS`   | `3000`        |
    /// | `JOB_POLL_BACKOFF`     | `exponential` |
    /// | `JOB_POLL_INITIAL_MS`  | `2000`        |
    /// | `JOB_POLL_MAX_MS`      | `30000`       |
    /// | `JOB_POLL_MULTIPLIER`  | `1.5`         |
    /// | `JOB_MAX_WAIT_SECS`    | `600`         |
    /// | `JOB_RESULT_FORMAT`    | `auto`        |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_retries = parse_or(&lookup, "JOB_MAX_RETRIES", defaults.max_retries).max(1);
        let poll_max_retries =
            parse_or(&lookup, "JOB_POLL_MAX_RETRIES", defaults.poll_max_retries).max(1);
        let retry_delay = Duration::from_millis(positive_or(
            &lookup,
            "JOB_RETRY_DELAY_MS",
            defaults.retry_delay.as_millis() as u64,
        ));
        let max_wait = Duration::from_secs(parse_or(
            &lookup,
            "JOB_MAX_WAIT_SECS",
            defaults.max_wait.as_secs(),
        ));

        let poll_backoff = match lookup("JOB_POLL_BACKOFF").as_deref().map(str::trim) {
            Some("jittered") | Some("jitter") => PollBackoff::jittered(),
            Some("exponential") | None => PollBackoff::Exponential {
                initial: Duration::from_millis(positive_or(
                    &lookup,
                    "JOB_POLL_INITIAL_MS",
                    DEFAULT_INITIAL_DELAY.as_millis() as u64,
                )),
                multiplier: parse_or(&lookup, "JOB_POLL_MULTIPLIER", DEFAULT_MULTIPLIER),
                max: Duration::from_millis(positive_or(
                    &lookup,
                    "JOB_POLL_MAX_MS",
                    DEFAULT_MAX_DELAY.as_millis() as u64,
                )),
            },
            Some(other) => {
                tracing::warn!(value = other, "Unknown JOB_POLL_BACKOFF, using exponential");
                PollBackoff::default()
            }
        };

        let result_format = match lookup("JOB_RESULT_FORMAT") {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "Invalid JOB_RESULT_FORMAT, using auto");
                ResultFormat::default()
            }),
            None => defaults.result_format,
        };

        Self {
            max_retries,
            poll_max_retries,
            retry_delay,
            poll_backoff,
            max_wait,
            result_format,
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max.max(1);
        self
    }

    pub fn with_poll_backoff(mut self, backoff: PollBackoff) -> Self {
        self.poll_backoff = backoff;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_result_format(mut self, format: ResultFormat) -> Self {
        self.result_format = format;
        self
    }
}

/// Connection settings for the HTTP job service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Base URL, e.g. `https://api.example.com/generate`.
    pub base_url: String,
    /// Bearer token injected as the `Authorization` header, if set.
    pub auth_token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl ServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Load from environment variables. Returns `None` if
    /// `JOB_SERVICE_URL` is not set.
    ///
    /// | Variable                   | Required | Default |
    /// |----------------------------|----------|---------|
    /// | `JOB_SERVICE_URL`          | yes      | --      |
    /// | `JOB_SERVICE_AUTH_TOKEN`   | no       | --      |
    /// | `JOB_SERVICE_TIMEOUT_SECS` | no       | `30`    |
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. An invalid or zero timeout
    /// falls back to the default and logs a warning.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("JOB_SERVICE_URL")?;
        let timeout_secs = positive_or(
            &lookup,
            "JOB_SERVICE_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        );

        Some(Self {
            auth_token: lookup("JOB_SERVICE_AUTH_TOKEN").filter(|t| !t.trim().is_empty()),
            request_timeout: Duration::from_secs(timeout_secs),
            ..Self::new(base_url)
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            default
        }),
        None => default,
    }
}

/// Like [`parse_or`], but a zero value also falls back to `default`.
fn positive_or<F>(lookup: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default) {
        0 => {
            tracing::warn!(key, "Zero is not allowed here, using default");
            default
        }
        value => value,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = TrackerConfig::from_lookup(lookup(&[]));
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(3000));
        assert_eq!(config.max_wait, Duration::from_secs(600));
    }

    #[test]
    fn overrides_are_applied() {
        let config = TrackerConfig::from_lookup(lookup(&[
            ("JOB_MAX_RETRIES", "3"),
            ("JOB_RETRY_DELAY_MS", "100"),
            ("JOB_POLL_INITIAL_MS", "500"),
            ("JOB_POLL_MULTIPLIER", "2"),
            ("JOB_POLL_MAX_MS", "4000"),
            ("JOB_MAX_WAIT_SECS", "60"),
            ("JOB_RESULT_FORMAT", "encoded_json"),
        ]));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(100));
        assert_eq!(
            config.poll_backoff,
            PollBackoff::Exponential {
                initial: Duration::from_millis(500),
                multiplier: 2.0,
                max: Duration::from_millis(4000),
            }
        );
        assert_eq!(config.max_wait, Duration::from_secs(60));
        assert_eq!(config.result_format, ResultFormat::EncodedJson);
    }

    #[test]
    fn jittered_backoff_is_selectable() {
        let config = TrackerConfig::from_lookup(lookup(&[("JOB_POLL_BACKOFF", "jittered")]));
        assert_eq!(config.poll_backoff, PollBackoff::jittered());
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = TrackerConfig::from_lookup(lookup(&[
            ("JOB_MAX_RETRIES", "many"),
            ("JOB_POLL_BACKOFF", "fibonacci"),
            ("JOB_RESULT_FORMAT", "xml"),
        ]));
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn zero_retries_is_raised_to_one() {
        let config = TrackerConfig::from_lookup(lookup(&[("JOB_MAX_RETRIES", "0")]));
        assert_eq!(config.max_retries, 1);
    }

    #[test]
    fn service_config_trims_trailing_slash() {
        let config = ServiceConfig::new("http://localhost:8080/api/");
        assert_eq!(config.base_url, "http://localhost:8080/api");
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn zero_delays_fall_back_to_defaults() {
        let config = TrackerConfig::from_lookup(lookup(&[
            ("JOB_RETRY_DELAY_MS", "0"),
            ("JOB_POLL_INITIAL_MS", "0"),
            ("JOB_POLL_MAX_MS", "0"),
        ]));
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn service_config_requires_url() {
        assert!(ServiceConfig::from_lookup(lookup(&[])).is_none());
    }

    #[test]
    fn service_config_reads_auth_and_timeout() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("JOB_SERVICE_URL", "http://jobs.internal/"),
            ("JOB_SERVICE_AUTH_TOKEN", "secret"),
            ("JOB_SERVICE_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "http://jobs.internal");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn bad_service_timeout_falls_back_to_default() {
        for raw in ["soon", "0"] {
            let config = ServiceConfig::from_lookup(lookup(&[
                ("JOB_SERVICE_URL", "http://jobs.internal"),
                ("JOB_SERVICE_TIMEOUT_SECS", raw),
            ]))
            .unwrap();
            assert_eq!(config.request_timeout, Duration::from_secs(30));
        }
    }
}
