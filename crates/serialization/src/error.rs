//! Compile-time script errors (§4.3.1). Once a script exists, runtime
//! failures are signalled as [`crate::step::StepOutcome::Failed`]
//! rather than through this type (§4.3.6, §7).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    UnknownType(String),
    UnknownField { struct_name: String, field_name: String },
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::UnknownType(name) => write!(f, "no reflection data for type '{name}'"),
            ScriptError::UnknownField { struct_name, field_name } => {
                write!(f, "struct '{struct_name}' has no field '{field_name}' to serve as a visibility condition")
            }
        }
    }
}

impl std::error::Error for ScriptError {}
