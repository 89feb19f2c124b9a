//! Script execution inside the embedded interpreter.
//!
//! ```text
//! swap sys.stdout ──► exec top level ──► call main() ──► convert result
//!        │                                                     │
//!        └──────────────── restore, collect output ◄───────────┘
//! ```
//!
//! The script runs with a fresh globals dict, so nothing from the harness
//! leaks into its namespace. Output printed at the top level and inside
//! `main()` both land in the captured buffer.

use std::fs;
use std::path::Path;

use pyo3::prelude::*;
use pyo3::types::{PyDict, PyModule};
use scriptbox::ResultRecord;
use serde_json::Value;

use crate::convert;
use crate::error::HarnessError;

/// Read and run the script at `path`.
pub fn run_file(path: &Path) -> ResultRecord {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "failed to read script");
            return ResultRecord::failure(HarnessError::Read(e).to_string(), "");
        }
    };
    Python::with_gil(|py| run_source(py, &source))
}

/// Run `source` and build its result record.
pub fn run_source(py: Python<'_>, source: &str) -> ResultRecord {
    let capture = match StdoutCapture::install(py) {
        Ok(capture) => capture,
        Err(e) => return ResultRecord::failure(HarnessError::from(e).to_string(), ""),
    };
    let result = execute(py, source);
    let stdout = capture.restore();

    match result {
        Ok(value) => ResultRecord::success(value, stdout),
        Err(err) => {
            tracing::debug!(error = %err, "script failed");
            ResultRecord::failure(err.to_string(), stdout)
        }
    }
}

fn execute(py: Python<'_>, source: &str) -> Result<Value, HarnessError> {
    let globals = PyDict::new(py);
    globals.set_item("__builtins__", PyModule::import(py, "builtins")?)?;

    py.run(source, Some(globals), None)
        .map_err(|e| HarnessError::Script(exception_message(py, &e)))?;

    let main = match globals.get_item("main")? {
        Some(main) if main.is_callable() => main,
        _ => return Err(HarnessError::NoMain),
    };
    let value = main
        .call0()
        .map_err(|e| HarnessError::Main(exception_message(py, &e)))?;

    Ok(convert::to_json(value)?)
}

/// `str(exc)`, as a script author would see it.
fn exception_message(py: Python<'_>, err: &PyErr) -> String {
    match err.value(py).str() {
        Ok(s) => s.to_string_lossy().into_owned(),
        Err(_) => err.to_string(),
    }
}

/// `sys.stdout` redirected to an `io.StringIO` until [`restore`](Self::restore).
struct StdoutCapture<'py> {
    sys: &'py PyModule,
    original: &'py PyAny,
    buffer: &'py PyAny,
}

impl<'py> StdoutCapture<'py> {
    fn install(py: Python<'py>) -> PyResult<Self> {
        let sys = PyModule::import(py, "sys")?;
        let buffer = PyModule::import(py, "io")?.getattr("StringIO")?.call0()?;
        let original = sys.getattr("stdout")?;
        sys.setattr("stdout", buffer)?;
        Ok(Self {
            sys,
            original,
            buffer,
        })
    }

    /// Put the real stream back and return everything written to the buffer.
    fn restore(self) -> String {
        if let Err(e) = self.sys.setattr("stdout", self.original) {
            tracing::warn!(error = %e, "failed to restore sys.stdout");
        }
        // Stray writes to the real stream must land before the record line.
        if let Err(e) = self.original.call_method0("flush") {
            tracing::debug!(error = %e, "failed to flush sys.stdout");
        }

        match self
            .buffer
            .call_method0("getvalue")
            .and_then(|v| v.extract::<String>())
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read captured output");
                String::new()
            }
        }
    }
}
