//! Result records and the text protocol used to recover them.
//!
//! The harness ends its stdout with one JSON object:
//!
//! ```text
//! {"result": <any JSON value>, "stdout": "<captured text>"}
//! {"error": "<message>", "stdout": "<captured text or empty>"}
//! ```
//!
//! When the harness runs under the isolation tool, the tool's own log lines
//! share the stream. Recovery scans lines from the end and takes the first one
//! that starts with `{` after trimming; everything else is noise.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Value, json};
use thiserror::Error;

use crate::error::OrchestrationError;

/// Structured outcome emitted by the harness.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultRecord {
    Success { result: Value, stdout: String },
    Failure { error: String, stdout: String },
}

/// Error decoding a record line.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("no line starting with '{{' in output")]
    Missing,

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Shape(&'static str),
}

impl ResultRecord {
    pub fn success(result: Value, stdout: impl Into<String>) -> Self {
        Self::Success {
            result,
            stdout: stdout.into(),
        }
    }

    pub fn failure(error: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            stdout: stdout.into(),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[inline]
    pub fn stdout(&self) -> &str {
        match self {
            Self::Success { stdout, .. } | Self::Failure { stdout, .. } => stdout,
        }
    }

    /// Decode one record line.
    ///
    /// An `error` key wins over `result`. A missing or null `stdout` decodes
    /// as empty.
    pub fn decode(line: &str) -> Result<Self, RecordError> {
        let Value::Object(mut map) = serde_json::from_str::<Value>(line)? else {
            return Err(RecordError::Shape("record is not a JSON object"));
        };

        let stdout = match map.remove("stdout") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(_) => return Err(RecordError::Shape("`stdout` must be a string")),
        };

        if let Some(error) = map.remove("error") {
            return match error {
                Value::String(error) => Ok(Self::Failure { error, stdout }),
                _ => Err(RecordError::Shape("`error` must be a string")),
            };
        }

        match map.remove("result") {
            Some(result) => Ok(Self::Success { result, stdout }),
            None => Err(RecordError::Shape("record has neither `result` nor `error`")),
        }
    }

    /// Encode as a single line with no trailing newline.
    pub fn to_line(&self) -> String {
        // Serializing a `Value` tree into a string cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"error": "failed to encode result record", "stdout": ""}"#.to_string()
        })
    }
}

impl Serialize for ResultRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            Self::Success { result, stdout } => {
                map.serialize_entry("result", result)?;
                map.serialize_entry("stdout", stdout)?;
            }
            Self::Failure { error, stdout } => {
                map.serialize_entry("error", error)?;
                map.serialize_entry("stdout", stdout)?;
            }
        }
        map.end()
    }
}

/// Last line of `output` that starts with `{` once trimmed.
pub fn find_record_line(output: &str) -> Option<&str> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
}

/// Recover the harness record from a noisy output stream.
///
/// Only the last brace-prefixed line is tried; an undecodable candidate is an
/// error, not a reason to keep scanning.
pub fn recover_record(output: &str) -> Result<ResultRecord, RecordError> {
    let line = find_record_line(output).ok_or(RecordError::Missing)?;
    ResultRecord::decode(line)
}

/// What an orchestrated execution hands back to its caller.
///
/// Either the harness's own record or an orchestration failure. Never both.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Record(ResultRecord),
    Failed(OrchestrationError),
}

impl ExecutionOutcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Record(r) if r.is_success())
    }

    /// Captured stdout, whichever side produced it.
    pub fn stdout(&self) -> &str {
        match self {
            Self::Record(record) => record.stdout(),
            Self::Failed(err) => err.stdout(),
        }
    }

    /// Error message, if this outcome is any kind of failure.
    pub fn error(&self) -> Option<String> {
        match self {
            Self::Record(ResultRecord::Success { .. }) => None,
            Self::Record(ResultRecord::Failure { error, .. }) => Some(error.clone()),
            Self::Failed(err) => Some(err.to_string()),
        }
    }

    pub fn record(&self) -> Option<&ResultRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Failed(_) => None,
        }
    }

    /// Wire form: the record itself, or `{"error": ..., "stdout": ...}`.
    pub fn to_json(&self) -> Value {
        // Every field is already a `Value` or a string, so this cannot fail.
        serde_json::to_value(self).unwrap_or_else(|_| {
            json!({"error": "failed to encode result record", "stdout": ""})
        })
    }
}

impl From<ResultRecord> for ExecutionOutcome {
    fn from(record: ResultRecord) -> Self {
        Self::Record(record)
    }
}

impl From<OrchestrationError> for ExecutionOutcome {
    fn from(err: OrchestrationError) -> Self {
        Self::Failed(err)
    }
}

impl Serialize for ExecutionOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Record(record) => record.serialize(serializer),
            Self::Failed(err) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("error", &err.to_string())?;
                map.serialize_entry("stdout", err.stdout())?;
                map.end()
            }
        }
    }
}
