//! Job service response types and classifiers.
//!
//! The job service answers the three protocol calls with loosely-shaped
//! JSON. This module turns those bodies into typed values:
//!
//! - `start` -> [`StartResponse`] (`{"token": "..."}`)
//! - `query` -> [`QueryResponse`] (`{"status": "progress"}`,
//!   `{"progress": 40}`, `{"status": "completed"}`, `{"status": "error"}`)
//! - `end`   -> [`EndResponse`] (`{"response": <object or JSON string>}`)
//!
//! The raw body is always retained for diagnostics.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response returned by the `start` endpoint after the job was queued.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StartResponse {
    /// Opaque backend identifier for the queued job.
    pub token: String,
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Classified state of a `query` response.
#[derive(Debug, Clone, PartialEq)]
pub enum JobProgress {
    /// More polling needed. `percent` is set when the backend used the
    /// numeric `{"progress": n}` shape.
    Pending { percent: Option<f64> },
    /// The job finished; fetch the result with `end`.
    Completed,
    /// The backend reported the job as failed.
    Error,
    /// Neither a known `status` nor a numeric `progress` was present.
    Unrecognized,
}

/// A classified `query` response plus the body it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub state: JobProgress,
    pub raw: Value,
}

impl QueryResponse {
    /// Classify a raw `query` body.
    ///
    /// An explicit `status` string wins over a numeric `progress` field.
    /// Both `{"status": "progress"}` and `{"progress": n}` mean the same
    /// thing: keep polling.
    pub fn from_value(raw: Value) -> Self {
        let percent = raw.get("progress").and_then(Value::as_f64);

        let state = match raw.get("status").and_then(Value::as_str) {
            Some(status) => match status.to_ascii_lowercase().as_str() {
                "progress" | "pending" | "processing" | "queued" => JobProgress::Pending { percent },
                "completed" => JobProgress::Completed,
                "error" | "failed" => JobProgress::Error,
                _ => JobProgress::Unrecognized,
            },
            None => match percent {
                Some(p) => JobProgress::Pending { percent: Some(p) },
                None => JobProgress::Unrecognized,
            },
        };

        Self { state, raw }
    }
}

// ---------------------------------------------------------------------------
// End
// ---------------------------------------------------------------------------

/// Response returned by the `end` endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EndResponse {
    /// The result field. `None` when missing or `null`.
    pub response: Option<Value>,
    pub raw: Value,
}

impl EndResponse {
    pub fn from_value(raw: Value) -> Self {
        let response = raw.get("response").filter(|v| !v.is_null()).cloned();
        Self { response, raw }
    }
}

// ---------------------------------------------------------------------------
// Result parsing
// ---------------------------------------------------------------------------

/// How the `response` field of an `end` body is turned into a result.
///
/// Some generators return the result object directly; others return it
/// JSON-encoded inside a string and need a second parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFormat {
    /// Use the value as-is.
    Object,
    /// The value must be a string holding JSON.
    EncodedJson,
    /// Decode strings that hold JSON; pass everything else through.
    #[default]
    Auto,
}

impl ResultFormat {
    /// Apply the parse step. The error string becomes the
    /// `MalformedResult` reason.
    pub fn parse(&self, value: Value) -> Result<Value, String> {
        match self {
            ResultFormat::Object => Ok(value),
            ResultFormat::EncodedJson => match value {
                Value::String(s) => serde_json::from_str(&s)
                    .map_err(|e| format!("response is not valid encoded JSON: {e}")),
                other => Err(format!(
                    "expected a JSON-encoded string, got {}",
                    value_kind(&other)
                )),
            },
            ResultFormat::Auto => match value {
                Value::String(s) => Ok(serde_json::from_str(&s).unwrap_or(Value::String(s))),
                other => Ok(other),
            },
        }
    }
}

impl FromStr for ResultFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "object" => Ok(ResultFormat::Object),
            "encoded_json" | "string" => Ok(ResultFormat::EncodedJson),
            "auto" => Ok(ResultFormat::Auto),
            other => Err(format!("unknown result format '{other}'")),
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn status_progress_and_numeric_progress_are_equivalent() {
        let a = QueryResponse::from_value(json!({"status": "progress"}));
        let b = QueryResponse::from_value(json!({"progress": 40}));
        assert_eq!(a.state, JobProgress::Pending { percent: None });
        assert_eq!(b.state, JobProgress::Pending { percent: Some(40.0) });
    }

    #[test]
    fn pending_status_keeps_polling() {
        let r = QueryResponse::from_value(json!({"status": "pending", "progress": 12.5}));
        assert_eq!(r.state, JobProgress::Pending { percent: Some(12.5) });
    }

    #[test]
    fn completed_status_wins_over_progress() {
        let r = QueryResponse::from_value(json!({"status": "completed", "progress": 90}));
        assert_eq!(r.state, JobProgress::Completed);
    }

    #[test]
    fn error_status_is_classified() {
        let r = QueryResponse::from_value(json!({"status": "error", "message": "quota"}));
        assert_eq!(r.state, JobProgress::Error);
        assert_eq!(r.raw["message"], "quota");
    }

    #[test]
    fn unknown_shapes_are_unrecognized() {
        assert_eq!(
            QueryResponse::from_value(json!({"status": "exploded"})).state,
            JobProgress::Unrecognized
        );
        assert_eq!(
            QueryResponse::from_value(json!({"progress": "forty"})).state,
            JobProgress::Unrecognized
        );
        assert_eq!(QueryResponse::from_value(json!([])).state, JobProgress::Unrecognized);
    }

    #[test]
    fn end_response_missing_or_null_is_none() {
        assert_eq!(EndResponse::from_value(json!({})).response, None);
        assert_eq!(EndResponse::from_value(json!({"response": null})).response, None);
        assert_eq!(
            EndResponse::from_value(json!({"response": {"h": "headline"}})).response,
            Some(json!({"h": "headline"}))
        );
    }

    #[test]
    fn encoded_json_requires_a_string() {
        let parsed = ResultFormat::EncodedJson
            .parse(json!("{\"faqs\": [1, 2]}"))
            .unwrap();
        assert_eq!(parsed, json!({"faqs": [1, 2]}));

        let err = ResultFormat::EncodedJson.parse(json!({"faqs": []})).unwrap_err();
        assert!(err.contains("an object"));

        assert!(ResultFormat::EncodedJson.parse(json!("not json")).is_err());
    }

    #[test]
    fn auto_format_decodes_only_json_strings() {
        assert_eq!(ResultFormat::Auto.parse(json!("[1]")).unwrap(), json!([1]));
        assert_eq!(
            ResultFormat::Auto.parse(json!("plain headline")).unwrap(),
            json!("plain headline")
        );
        assert_eq!(ResultFormat::Auto.parse(json!({"a": 1})).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn result_format_from_str() {
        assert_eq!("object".parse::<ResultFormat>(), Ok(ResultFormat::Object));
        assert_eq!("Encoded_JSON".parse::<ResultFormat>(), Ok(ResultFormat::EncodedJson));
        assert!("yaml".parse::<ResultFormat>().is_err());
    }
}
