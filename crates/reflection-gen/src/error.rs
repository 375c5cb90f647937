//! Reflection preprocessor error kinds and their process exit codes.
//!
//! Three-tier classification (structural / syntactic / semantic) that
//! collapses syntactic and semantic failures into one `Parse` variant
//! at the CLI boundary, since both print the same
//! `[path:line:column] message` form and share exit code -4.

use kan_codegen_core::Diagnostic;
use std::fmt;

#[derive(Debug)]
pub enum ReflectionError {
    /// Wrong argument count on the command line.
    Arguments(String),
    /// Target list file missing, unreadable, or malformed.
    TargetListLoad(String),
    /// Input list file missing, unreadable, or one listed input couldn't be read.
    InputListLoad(String),
    /// Tokenizer/grammar mismatch or a semantic rule violation while scanning an input.
    Parse(Diagnostic),
    /// The product file couldn't be written.
    Write(String),
}

impl ReflectionError {
    /// Process exit code per §6.1.
    pub fn exit_code(&self) -> i32 {
        match self {
            ReflectionError::Arguments(_) => -1,
            ReflectionError::TargetListLoad(_) => -2,
            ReflectionError::InputListLoad(_) => -3,
            ReflectionError::Parse(_) => -4,
            ReflectionError::Write(_) => -5,
        }
    }
}

impl fmt::Display for ReflectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReflectionError::Arguments(m) => write!(f, "{m}"),
            ReflectionError::TargetListLoad(m) => write!(f, "failed to load target list: {m}"),
            ReflectionError::InputListLoad(m) => write!(f, "failed to load input list: {m}"),
            ReflectionError::Parse(d) => write!(f, "{d}"),
            ReflectionError::Write(m) => write!(f, "failed to write product: {m}"),
        }
    }
}

impl std::error::Error for ReflectionError {}

impl From<Diagnostic> for ReflectionError {
    fn from(d: Diagnostic) -> Self {
        ReflectionError::Parse(d)
    }
}
