//! Shared scanning primitives for the reflection and universe preprocessors.
//!
//! Both preprocessors tokenize C source byte-by-byte and must report
//! diagnostics as `[path:line:column] message`. This crate holds the one
//! scanner implementation both binaries drive, plus the diagnostic type and
//! the path-normalization rule the target-file matcher depends on.
//!
//! # Modules
//!
//! - `scanner`: refillable ring-buffer byte scanner with markable backtrack points
//! - `diagnostics`: `[path:line:column] message` diagnostic type
//! - `path_norm`: `\` -> `/` normalization for target-file matching

pub mod diagnostics;
pub mod path_norm;
pub mod scanner;

pub use diagnostics::Diagnostic;
pub use path_norm::normalize_path;
pub use scanner::{ByteScanner, Mark};
