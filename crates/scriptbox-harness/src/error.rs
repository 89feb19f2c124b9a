//! Harness failures. The display text is the record's `error` field.

use std::io;

use pyo3::PyErr;
use thiserror::Error;

use crate::convert::ConvertError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("No script file provided")]
    Usage,

    #[error("{0}")]
    Read(#[from] io::Error),

    /// The top level of the script raised.
    #[error("{0}")]
    Script(String),

    #[error("No main() function found in the script")]
    NoMain,

    #[error("Error in main(): {0}")]
    Main(String),

    #[error("{0}")]
    Convert(#[from] ConvertError),

    /// The interpreter itself failed outside user code.
    #[error("{0}")]
    Interpreter(#[from] PyErr),
}
