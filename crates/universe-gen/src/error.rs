//! Universe preprocessor error kinds and their process exit codes.

use kan_codegen_core::Diagnostic;
use std::fmt;

#[derive(Debug)]
pub enum UniverseError {
    Arguments(String),
    InputOpen(String),
    Scan(Diagnostic),
    Output(Diagnostic),
    OutputOpen(String),
}

impl UniverseError {
    /// Process exit code per §6.2.
    pub fn exit_code(&self) -> i32 {
        match self {
            UniverseError::Arguments(_) => -1,
            UniverseError::InputOpen(_) => -2,
            UniverseError::Scan(_) => -3,
            UniverseError::Output(_) => -4,
            UniverseError::OutputOpen(_) => -5,
        }
    }
}

impl fmt::Display for UniverseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniverseError::Arguments(m) => write!(f, "{m}"),
            UniverseError::InputOpen(m) => write!(f, "failed to open input: {m}"),
            UniverseError::Scan(d) => write!(f, "{d}"),
            UniverseError::Output(d) => write!(f, "{d}"),
            UniverseError::OutputOpen(m) => write!(f, "failed to open output: {m}"),
        }
    }
}

impl std::error::Error for UniverseError {}
