//! `[path:line:column] message` diagnostics.
//!
//! This is the only normative part of the diagnostic contract: callers may
//! log however they like, but a fatal error reaching the user must carry a
//! file, a 1-indexed line, and a 1-indexed column.

use std::fmt;

/// A single fatal diagnostic, line-accurate to the byte that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub path: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(path: impl Into<String>, line: u32, column: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            path: path.into(),
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}:{}] {}",
            self.path, self.line, self.column, self.message
        )
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_as_path_line_column_message() {
        let d = Diagnostic::new("foo.h", 12, 4, "unexpected token");
        assert_eq!(d.to_string(), "[foo.h:12:4] unexpected token");
    }
}
