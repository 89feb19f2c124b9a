//! Validator, orchestrator and the real harness together.
//!
//! The isolation tool is a pass-through shell wrapper, so these tests check
//! the wiring rather than the isolation.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use scriptbox::{Orchestrator, OrchestratorConfig, validate};
use serde_json::{Value, json};
use tempfile::TempDir;

const HARNESS: &str = env!("CARGO_BIN_EXE_scriptbox-harness");

const PASS_THROUGH_SANDBOX: &str = r#"
while [ "$#" -gt 0 ]; do
    if [ "$1" = "--" ]; then
        shift
        break
    fi
    shift
done
echo "[I] Mode: STANDALONE_ONCE"
"$@"
status=$?
echo "[I] process exited with status: $status"
exit $status
"#;

struct Setup {
    dir: TempDir,
    orchestrator: Orchestrator,
}

fn setup() -> Option<Setup> {
    setup_with_timeout(Duration::from_secs(20))
}

fn setup_with_timeout(timeout: Duration) -> Option<Setup> {
    let Ok(sh) = which::which("sh") else {
        eprintln!("Skipping: sh not found");
        return None;
    };
    let dir = tempfile::tempdir().unwrap();
    let wrapper = dir.path().join("sandbox.sh");
    let policy = dir.path().join("policy.cfg");
    fs::write(&wrapper, PASS_THROUGH_SANDBOX).unwrap();
    fs::write(&policy, "mode: ONCE\n").unwrap();

    let config = OrchestratorConfig::new()
        .sandbox_bin(sh)
        .sandbox_arg(wrapper.to_string_lossy())
        .policy_path(policy)
        .harness_path(HARNESS)
        .scratch_dir(dir.path().join("scratch"))
        .probe_timeout(timeout)
        .sandbox_timeout(timeout);
    Some(Setup {
        dir,
        orchestrator: Orchestrator::new(config),
    })
}

impl Setup {
    fn submit(&self, source: &str) -> Value {
        if let Err(e) = validate(source) {
            return json!({"error": e.to_string()});
        }
        self.orchestrator.execute(source).to_json()
    }

    fn scratch_files(&self) -> Vec<PathBuf> {
        match fs::read_dir(self.dir.path().join("scratch")) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[test]
fn prints_and_returns() {
    let Some(setup) = setup() else { return };
    let out = setup.submit("def main():\n    print(\"hi\")\n    return 42");
    assert_eq!(out, json!({"result": 42, "stdout": "hi\n"}));
    assert!(setup.scratch_files().is_empty());
}

#[test]
fn main_error_is_reported_from_probe() {
    let Some(setup) = setup() else { return };
    let out = setup.submit("def main():\n    print('step 1')\n    raise ValueError('boom')\n");
    assert_eq!(
        out,
        json!({"error": "Error in main(): boom", "stdout": "step 1\n"})
    );
    assert!(setup.scratch_files().is_empty());
}

#[test]
fn forbidden_import_never_runs() {
    let Some(setup) = setup() else { return };
    let out = setup.submit("import os\ndef main():\n    return 1");
    assert_eq!(out, json!({"error": "Forbidden import: os"}));
    assert!(setup.scratch_files().is_empty());
}

#[test]
fn computed_result() {
    let Some(setup) = setup() else { return };
    let out = setup.submit(
        "import math\n\ndef main():\n    squares = [i * i for i in range(5)]\n    return {'squares': squares, 'pi': round(math.pi, 2)}\n",
    );
    assert_eq!(
        out,
        json!({"result": {"squares": [0, 1, 4, 9, 16], "pi": 3.14}, "stdout": ""})
    );
}

#[test]
fn float_result_keeps_every_digit() {
    let Some(setup) = setup() else { return };
    let out = setup.submit("def main():\n    return 907.3038322028689\n");
    assert_eq!(out, json!({"result": 907.3038322028689, "stdout": ""}));
}

#[test]
fn endless_main_times_out() {
    let Some(setup) = setup_with_timeout(Duration::from_secs(2)) else { return };
    let start = Instant::now();
    let out = setup.submit("def main():\n    while True:\n        pass\n");
    assert_eq!(out, json!({"error": "Execution timed out", "stdout": ""}));
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(setup.scratch_files().is_empty());
}
