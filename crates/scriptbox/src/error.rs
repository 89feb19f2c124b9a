//! Error types for orchestration.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::record::RecordError;

/// Which of the two harness runs an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Direct, unsandboxed trial run.
    Probe,
    /// Authoritative run inside the isolation tool.
    Sandbox,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => f.write_str("probe"),
            Self::Sandbox => f.write_str("sandbox"),
        }
    }
}

/// Failure of an orchestrated execution.
///
/// The display text is the caller-facing `error` message; [`stdout`](Self::stdout)
/// is whatever output was recovered before the failure.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Execution error: {0}")]
    Materialize(#[source] io::Error),

    #[error("Execution error: failed to launch {phase} run: {source}")]
    Spawn {
        phase: Phase,
        #[source]
        source: io::Error,
    },

    #[error("Script execution failed: {stderr}")]
    ProbeFailed { stderr: String, stdout: String },

    #[error("Sandbox execution failed: {stderr}")]
    SandboxFailed { stderr: String, stdout: String },

    #[error("Execution timed out")]
    Timeout { phase: Phase, after: Duration },

    #[error("Execution output exceeded {limit} bytes")]
    OutputLimit {
        phase: Phase,
        limit: usize,
        stdout: String,
    },

    #[error("No valid JSON result found in output")]
    NoResult { stdout: String },

    #[error("Failed to parse execution result: {source}")]
    Decode {
        #[source]
        source: RecordError,
        stdout: String,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl OrchestrationError {
    /// Output captured before the failure. Empty when nothing was recovered.
    pub fn stdout(&self) -> &str {
        match self {
            Self::ProbeFailed { stdout, .. }
            | Self::SandboxFailed { stdout, .. }
            | Self::OutputLimit { stdout, .. }
            | Self::NoResult { stdout }
            | Self::Decode { stdout, .. } => stdout,
            Self::Materialize(_) | Self::Spawn { .. } | Self::Timeout { .. } | Self::InvalidConfig(_) => "",
        }
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Zero exit, but no usable record in the output.
    #[inline]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::NoResult { .. } | Self::Decode { .. })
    }

    /// Build the protocol error for a failed recovery.
    pub(crate) fn from_recovery(err: RecordError, stdout: String) -> Self {
        match err {
            RecordError::Missing => Self::NoResult { stdout },
            source => Self::Decode { source, stdout },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_wire_contract() {
        let err = OrchestrationError::Timeout {
            phase: Phase::Sandbox,
            after: Duration::from_secs(15),
        };
        assert_eq!(err.to_string(), "Execution timed out");
        assert_eq!(err.stdout(), "");
        assert!(err.is_timeout());

        let err = OrchestrationError::ProbeFailed {
            stderr: "Traceback ...".into(),
            stdout: "partial".into(),
        };
        assert_eq!(err.to_string(), "Script execution failed: Traceback ...");
        assert_eq!(err.stdout(), "partial");
    }

    #[test]
    fn output_limit_is_not_a_protocol_failure() {
        let err = OrchestrationError::OutputLimit {
            phase: Phase::Sandbox,
            limit: 1024,
            stdout: "xxxx".into(),
        };
        assert_eq!(err.to_string(), "Execution output exceeded 1024 bytes");
        assert_eq!(err.stdout(), "xxxx");
        assert!(!err.is_protocol());
        assert!(!err.is_timeout());
    }

    #[test]
    fn recovery_mapping() {
        let err = OrchestrationError::from_recovery(RecordError::Missing, "logs".into());
        assert!(matches!(err, OrchestrationError::NoResult { .. }));
        assert!(err.is_protocol());

        let json = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = OrchestrationError::from_recovery(json.into(), "{oops".into());
        assert!(err.to_string().starts_with("Failed to parse execution result: "));
        assert_eq!(err.stdout(), "{oops");
    }

    #[test]
    fn phase_display() {
        assert_eq!(Phase::Probe.to_string(), "probe");
        assert_eq!(Phase::Sandbox.to_string(), "sandbox");
    }
}
