//! scriptbox CLI - validate and run untrusted Python scripts

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scriptbox::{Orchestrator, OrchestratorConfig, Validator};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scriptbox")]
#[command(author, version, about = "Validate and run untrusted Python scripts in a sandbox")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a script against the static rules without running it
    Validate {
        /// Script file (or - for stdin)
        script: PathBuf,
    },

    /// Validate a script, then execute it and print the result record
    Run {
        /// Script file (or - for stdin)
        script: PathBuf,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Verify the sandbox binary, policy file and harness are present
    Check {
        #[command(flatten)]
        exec: ExecArgs,
    },
}

#[derive(Args)]
struct ExecArgs {
    /// Isolation tool executable
    #[arg(long)]
    sandbox_bin: Option<PathBuf>,

    /// Extra flag for the isolation tool (repeatable)
    #[arg(long = "sandbox-arg", allow_hyphen_values = true)]
    sandbox_args: Vec<String>,

    /// Sandbox policy file
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Harness executable
    #[arg(long)]
    harness: Option<PathBuf>,

    /// Directory for per-run script files
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Probe run timeout in seconds
    #[arg(long)]
    probe_timeout: Option<u64>,

    /// Sandboxed run timeout in seconds
    #[arg(long)]
    sandbox_timeout: Option<u64>,
}

impl ExecArgs {
    fn config(self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::new();
        if let Some(path) = self.sandbox_bin {
            config = config.sandbox_bin(path);
        }
        for arg in self.sandbox_args {
            config = config.sandbox_arg(arg);
        }
        if let Some(path) = self.policy {
            config = config.policy_path(path);
        }
        if let Some(path) = self.harness {
            config = config.harness_path(path);
        }
        if let Some(path) = self.scratch_dir {
            config = config.scratch_dir(path);
        }
        if let Some(secs) = self.probe_timeout {
            config = config.probe_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.sandbox_timeout {
            config = config.sandbox_timeout(Duration::from_secs(secs));
        }
        config
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("scriptbox=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { script } => {
            let source = read_script(&script)?;
            let verdict = Validator::new().verdict(&source);
            println!("{}", serde_json::to_string(&verdict)?);
            Ok(exit_code(verdict.valid))
        }

        Commands::Run { script, exec } => {
            let source = read_script(&script)?;
            if let Err(e) = Validator::new().validate(&source) {
                tracing::info!(reason = %e, "script rejected");
                println!("{}", json!({ "error": e.to_string() }));
                return Ok(ExitCode::FAILURE);
            }

            let orchestrator = Orchestrator::new(exec.config());
            let outcome = orchestrator.execute(&source);
            println!("{}", outcome.to_json());
            Ok(exit_code(outcome.is_success()))
        }

        Commands::Check { exec } => {
            let orchestrator = Orchestrator::new(exec.config());
            orchestrator.check()?;
            let config = orchestrator.config();
            println!("sandbox: {}", config.sandbox_bin.display());
            println!("policy:  {}", config.policy_path.display());
            println!("harness: {}", config.harness_path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_script(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut source = String::new();
        io::stdin()
            .read_to_string(&mut source)
            .context("failed to read script from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn exec_flags_build_config() {
        let cli = Cli::try_parse_from([
            "scriptbox",
            "run",
            "job.py",
            "--sandbox-bin",
            "/usr/bin/nsjail",
            "--sandbox-arg",
            "--quiet",
            "--policy",
            "/etc/nsjail/python.cfg",
            "--probe-timeout",
            "2",
            "--sandbox-timeout",
            "9",
        ])
        .unwrap();

        let Commands::Run { script, exec } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(script, PathBuf::from("job.py"));

        let config = exec.config();
        assert_eq!(config.sandbox_bin, PathBuf::from("/usr/bin/nsjail"));
        assert_eq!(config.sandbox_args, vec!["--quiet".to_string()]);
        assert_eq!(config.policy_path, PathBuf::from("/etc/nsjail/python.cfg"));
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.sandbox_timeout, Duration::from_secs(9));
    }

    #[test]
    fn defaults_apply_without_flags() {
        let cli = Cli::try_parse_from(["scriptbox", "check"]).unwrap();
        let Commands::Check { exec } = cli.command else {
            panic!("expected check");
        };
        assert_eq!(exec.config(), OrchestratorConfig::new());
    }
}
