//! scriptbox: run untrusted Python scripts behind an isolation boundary.
//!
//! A submission goes through three stages:
//!
//! 1. **Validation** ([`validate`]) rejects oversized, malformed or obviously
//!    dangerous source before any process is spawned.
//! 2. **Probe run**: the harness executes the script directly under a short
//!    deadline, so broken scripts fail fast with a clean error.
//! 3. **Sandboxed run**: the harness executes the script again through the
//!    external isolation tool (e.g. `nsjail`). Only this run's result counts.
//!
//! The harness (`scriptbox-harness`) prints exactly one JSON [`ResultRecord`]
//! as the last line of its stdout. The orchestrator recovers that line from
//! the isolation tool's noisy output.
//!
//! ## Quick Start
//!
//! ```ignore
//! use scriptbox::{validate, Orchestrator, OrchestratorConfig};
//! use std::time::Duration;
//!
//! let source = "def main():\n    print('hi')\n    return 42\n";
//! validate(source)?;
//!
//! let config = OrchestratorConfig::new()
//!     .policy_path("/etc/scriptbox/nsjail.cfg")
//!     .sandbox_timeout(Duration::from_secs(15));
//! let outcome = Orchestrator::new(config).execute(source);
//! println!("{}", outcome.to_json());
//! ```
//!
//! ## Security model
//!
//! The validator is defense in depth. It blocks known-bad syntactic shapes
//! and nothing more; process-level isolation is the actual guarantee.

mod config;
mod detect;
mod error;
mod monitor;
mod orchestrator;
mod record;
mod workspace;

pub mod validate;

pub use config::OrchestratorConfig;
pub use detect::{resolve_binary, sibling_binary};
pub use error::{OrchestrationError, Phase};
pub use orchestrator::Orchestrator;
pub use record::{ExecutionOutcome, RecordError, ResultRecord, find_record_line, recover_record};
pub use validate::{ValidationError, ValidationVerdict, Validator, validate};
pub use workspace::ScriptFile;
