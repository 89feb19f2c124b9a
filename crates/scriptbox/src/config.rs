//! Orchestrator configuration.
//!
//! Passed to [`Orchestrator::new`](crate::Orchestrator::new) and never shared
//! globally, so differently configured orchestrators can coexist.
//!
//! ## Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `sandbox_bin` | `nsjail` (looked up on `PATH`) |
//! | `sandbox_args` | none |
//! | `policy_path` | `/etc/scriptbox/nsjail.cfg` |
//! | `harness_path` | `scriptbox-harness` next to the current executable, else on `PATH` |
//! | `scratch_dir` | `$TMPDIR/scriptbox` |
//! | `probe_timeout` | 5 seconds |
//! | `sandbox_timeout` | 15 seconds |
//! | `max_output` | 1 MiB per stream |

use std::path::PathBuf;
use std::time::Duration;

use crate::detect::sibling_binary;

pub const DEFAULT_SANDBOX_BIN: &str = "nsjail";
pub const DEFAULT_POLICY_PATH: &str = "/etc/scriptbox/nsjail.cfg";
pub const HARNESS_BIN: &str = "scriptbox-harness";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Isolation tool executable.
    pub sandbox_bin: PathBuf,
    /// Extra flags for the isolation tool, placed before `--config`.
    pub sandbox_args: Vec<String>,
    /// Policy file handed to the isolation tool with `--config`.
    pub policy_path: PathBuf,
    /// Harness executable, invoked as `<harness> <script>`.
    pub harness_path: PathBuf,
    /// Directory for per-call script files.
    pub scratch_dir: PathBuf,
    pub probe_timeout: Duration,
    pub sandbox_timeout: Duration,
    /// Byte cap per captured stream.
    pub max_output: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self {
            sandbox_bin: PathBuf::from(DEFAULT_SANDBOX_BIN),
            sandbox_args: Vec::new(),
            policy_path: PathBuf::from(DEFAULT_POLICY_PATH),
            harness_path: sibling_binary(HARNESS_BIN).unwrap_or_else(|| PathBuf::from(HARNESS_BIN)),
            scratch_dir: std::env::temp_dir().join("scriptbox"),
            probe_timeout: Duration::from_secs(5),
            sandbox_timeout: Duration::from_secs(15),
            max_output: 1024 * 1024,
        }
    }

    pub fn sandbox_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.sandbox_bin = path.into();
        self
    }

    /// Add one flag for the isolation tool.
    pub fn sandbox_arg(mut self, arg: impl Into<String>) -> Self {
        self.sandbox_args.push(arg.into());
        self
    }

    pub fn policy_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.policy_path = path.into();
        self
    }

    pub fn harness_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.harness_path = path.into();
        self
    }

    pub fn scratch_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_dir = path.into();
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn sandbox_timeout(mut self, timeout: Duration) -> Self {
        self.sandbox_timeout = timeout;
        self
    }

    pub fn max_output(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }
}
