//! scriptbox-harness - runs one Python script and reports its `main()` result
//!
//! ```text
//! scriptbox-harness <script-path>
//! ```
//!
//! Prints exactly one JSON line as the last thing on stdout:
//! `{"result": ..., "stdout": ...}` on success (exit 0) or
//! `{"error": ..., "stdout": ...}` on any failure (exit 1). Diagnostics go to
//! stderr and are off unless `RUST_LOG` enables them.

mod convert;
mod error;
mod exec;

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use scriptbox::ResultRecord;
use tracing_subscriber::EnvFilter;

use crate::error::HarnessError;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off")))
        .with_writer(io::stderr)
        .without_time()
        .init();

    let mut args = std::env::args_os().skip(1);
    let record = match (args.next(), args.next()) {
        (Some(path), None) => exec::run_file(Path::new(&path)),
        _ => ResultRecord::failure(HarnessError::Usage.to_string(), ""),
    };

    emit(&record)
}

fn emit(record: &ResultRecord) -> ExitCode {
    let mut stdout = io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{}", record.to_line()).and_then(|()| stdout.flush()) {
        tracing::error!(error = %e, "failed to write result record");
        return ExitCode::FAILURE;
    }

    if record.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
