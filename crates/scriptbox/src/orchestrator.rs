//! Two-phase execution of a validated submission.
//!
//! ```text
//! materialize ──► probe run ──► sandboxed run ──► recover record
//!                 (direct,       (isolation tool,
//!                  short)         long, authoritative)
//! ```
//!
//! The probe fails fast on scripts that parse but break at runtime, without
//! paying for isolation setup and with clean diagnostics. Every successful
//! result still comes from the sandboxed run; the probe's output only gates it.
//!
//! The script file is removed when [`ScriptFile`] drops, which is the last
//! thing to happen on every path out of [`Orchestrator::execute`].

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::detect::resolve_binary;
use crate::error::{OrchestrationError, Phase};
use crate::monitor::{self, Output, Status};
use crate::record::{ExecutionOutcome, ResultRecord, recover_record};
use crate::workspace::ScriptFile;

/// Loader variables stripped from both harness runs.
const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "PYTHONSTARTUP",
    "PYTHONINSPECT",
];

/// Runs submissions through the probe and sandbox phases.
///
/// Holds only immutable configuration; one instance can serve concurrent
/// calls.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Verify the configured binaries and policy exist.
    pub fn check(&self) -> Result<(), OrchestrationError> {
        let config = &self.config;
        let sandbox = resolve_binary(&config.sandbox_bin);
        let harness = resolve_binary(&config.harness_path);
        let policy = config.policy_path.is_file();

        tracing::info!(
            sandbox_bin = %config.sandbox_bin.display(),
            sandbox_found = sandbox.is_some(),
            harness = %config.harness_path.display(),
            harness_found = harness.is_some(),
            policy = %config.policy_path.display(),
            policy_found = policy,
            "checked orchestrator config"
        );

        if sandbox.is_none() {
            return Err(OrchestrationError::InvalidConfig(format!(
                "sandbox binary not found: {}",
                config.sandbox_bin.display()
            )));
        }
        if harness.is_none() {
            return Err(OrchestrationError::InvalidConfig(format!(
                "harness not found: {}",
                config.harness_path.display()
            )));
        }
        if !policy {
            return Err(OrchestrationError::InvalidConfig(format!(
                "sandbox policy not found: {}",
                config.policy_path.display()
            )));
        }
        Ok(())
    }

    /// Execute a submission that already passed validation.
    pub fn execute(&self, submission: &str) -> ExecutionOutcome {
        match self.try_execute(submission) {
            Ok(record) => ExecutionOutcome::Record(record),
            Err(err) => {
                tracing::info!(error = %err, "execution failed");
                ExecutionOutcome::Failed(err)
            }
        }
    }

    fn try_execute(&self, submission: &str) -> Result<ResultRecord, OrchestrationError> {
        let script = ScriptFile::create(&self.config.scratch_dir, submission)
            .map_err(OrchestrationError::Materialize)?;
        tracing::debug!(path = %script.path().display(), "materialized script");

        let probe = self.run_phase(
            Phase::Probe,
            self.probe_command(script.path()),
            self.config.probe_timeout,
        )?;
        if !probe.success() {
            let stdout = probe.stdout_str();
            // A harness error record makes a cleaner message than raw stderr.
            if let Ok(record @ ResultRecord::Failure { .. }) = recover_record(&stdout) {
                return Ok(record);
            }
            return Err(OrchestrationError::ProbeFailed {
                stderr: probe.stderr_str(),
                stdout,
            });
        }

        let sandboxed = self.run_phase(
            Phase::Sandbox,
            self.sandbox_command(script.path()),
            self.config.sandbox_timeout,
        )?;
        let stdout = sandboxed.stdout_str();
        if !sandboxed.success() {
            return Err(OrchestrationError::SandboxFailed {
                stderr: sandboxed.stderr_str(),
                stdout,
            });
        }

        match recover_record(&stdout) {
            Ok(record) => Ok(record),
            Err(err) => Err(OrchestrationError::from_recovery(err, stdout)),
        }
    }

    fn run_phase(
        &self,
        phase: Phase,
        command: Command,
        timeout: Duration,
    ) -> Result<Output, OrchestrationError> {
        tracing::info!(%phase, command = ?command, "running harness");

        let output = monitor::run(command, timeout, self.config.max_output)
            .map_err(|source| OrchestrationError::Spawn { phase, source })?;

        tracing::debug!(
            %phase,
            status = ?output.status,
            exit_code = ?output.exit_code,
            signal = ?output.signal,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            elapsed = ?output.duration,
            "harness finished"
        );
        match output.status {
            Status::Timeout => Err(OrchestrationError::Timeout {
                phase,
                after: timeout,
            }),
            Status::OutputLimitExceeded => {
                tracing::warn!(%phase, max_output = self.config.max_output, "harness output over limit");
                Err(OrchestrationError::OutputLimit {
                    phase,
                    limit: self.config.max_output,
                    stdout: output.stdout_str(),
                })
            }
            Status::Exited | Status::Signaled => Ok(output),
        }
    }

    /// `<harness> <script>`
    fn probe_command(&self, script: &Path) -> Command {
        let mut cmd = Command::new(&self.config.harness_path);
        cmd.arg(script);
        scrub_env(&mut cmd);
        cmd
    }

    /// `<sandbox> [args..] --config <policy> -- <harness> <script>`
    fn sandbox_command(&self, script: &Path) -> Command {
        let mut cmd = Command::new(&self.config.sandbox_bin);
        cmd.args(&self.config.sandbox_args)
            .arg("--config")
            .arg(&self.config.policy_path)
            .arg("--")
            .arg(&self.config.harness_path)
            .arg(script);
        scrub_env(&mut cmd);
        cmd
    }
}

fn scrub_env(cmd: &mut Command) {
    for var in DANGEROUS_ENV_VARS {
        cmd.env_remove(var);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn args(cmd: &Command) -> Vec<&OsStr> {
        cmd.get_args().collect()
    }

    #[test]
    fn probe_command_line() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::new().harness_path("/opt/harness"));
        let cmd = orchestrator.probe_command(Path::new("/tmp/scriptbox/s.py"));
        assert_eq!(cmd.get_program(), "/opt/harness");
        assert_eq!(args(&cmd), ["/tmp/scriptbox/s.py"]);
    }

    #[test]
    fn sandbox_command_line() {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::new()
                .sandbox_bin("/usr/local/bin/nsjail")
                .sandbox_arg("--really_quiet")
                .policy_path("/etc/nsjail/python.cfg")
                .harness_path("/opt/harness"),
        );
        let cmd = orchestrator.sandbox_command(Path::new("/tmp/scriptbox/s.py"));
        assert_eq!(cmd.get_program(), "/usr/local/bin/nsjail");
        assert_eq!(
            args(&cmd),
            [
                "--really_quiet",
                "--config",
                "/etc/nsjail/python.cfg",
                "--",
                "/opt/harness",
                "/tmp/scriptbox/s.py"
            ]
        );
    }

    #[test]
    fn commands_scrub_loader_env() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::new());
        let cmd = orchestrator.probe_command(Path::new("s.py"));
        let removed: Vec<_> = cmd
            .get_envs()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.to_owned())
            .collect();
        assert!(removed.iter().any(|k| k == "LD_PRELOAD"));
    }

    #[test]
    fn check_reports_missing_policy() {
        let Ok(sh) = which::which("sh") else {
            eprintln!("Skipping: sh not found");
            return;
        };
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::new()
                .sandbox_bin(&sh)
                .harness_path(&sh)
                .policy_path("/nonexistent/policy.cfg"),
        );
        let err = orchestrator.check().unwrap_err();
        assert!(err.to_string().contains("sandbox policy not found"), "{err}");
    }

    #[test]
    fn check_reports_missing_sandbox() {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::new().sandbox_bin("/nonexistent/nsjail"),
        );
        let err = orchestrator.check().unwrap_err();
        assert!(err.to_string().contains("sandbox binary not found"), "{err}");
    }
}
