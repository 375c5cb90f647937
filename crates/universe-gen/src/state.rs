//! `ScannedState`: the per-state table of query fields discovered during
//! the scan pass, and the registry of every state seen in the file.

use crate::error::UniverseError;
use kan_codegen_core::Diagnostic;
use std::collections::BTreeMap;

/// One query field to be injected by `KAN_UP_GENERATE_STATE_QUERIES`.
/// Keyed in [`ScannedState::queries`] by its mangled name, which makes
/// the "same (type, path[, value]) collapses to one query" invariant a
/// property of `BTreeMap::entry` rather than something we check by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryField {
    pub mangled_name: String,
    pub field_type: String,
}

#[derive(Debug, Default)]
pub struct ScannedState {
    pub name: String,
    pub queries: BTreeMap<String, QueryField>,
}

impl ScannedState {
    fn new(name: &str) -> Self {
        ScannedState { name: name.to_string(), queries: BTreeMap::new() }
    }

    /// Insert or reuse a query field. `field_type` of a second insertion
    /// under the same mangled name must match the first; the emitter
    /// already guarantees this because identical macro arguments always
    /// mangle to the same name with the same field type.
    pub fn record(&mut self, mangled_name: String, field_type: String) {
        self.queries
            .entry(mangled_name.clone())
            .or_insert(QueryField { mangled_name, field_type });
    }
}

/// Every state seen across the file, keyed by name.
#[derive(Debug, Default)]
pub struct UniverseStates {
    states: BTreeMap<String, ScannedState>,
}

impl UniverseStates {
    pub fn new() -> Self {
        UniverseStates::default()
    }

    /// `KAN_UP_GENERATE_STATE_QUERIES(name)`: create a new, empty state.
    /// Error if one with this name already exists.
    pub fn declare(&mut self, name: &str, path: &str, line: u32, column: u32) -> Result<(), Diagnostic> {
        if self.states.contains_key(name) {
            return Err(Diagnostic::new(path, line, column, format!("state '{name}' is already declared")));
        }
        self.states.insert(name.to_string(), ScannedState::new(name));
        Ok(())
    }

    /// `KAN_UP_BIND_STATE(name, path)`: the bound state must already
    /// exist (declared by a `GENERATE_STATE_QUERIES` earlier in the
    /// file) since queries record themselves onto it by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ScannedState> {
        self.states.get_mut(name)
    }

    pub fn get(&self, name: &str) -> Option<&ScannedState> {
        self.states.get(name)
    }
}

pub fn require_state<'a>(
    states: &'a mut UniverseStates,
    name: &str,
    path: &str,
    line: u32,
    column: u32,
) -> Result<&'a mut ScannedState, UniverseError> {
    states
        .get_mut(name)
        .ok_or_else(|| UniverseError::Scan(Diagnostic::new(path, line, column, format!("unknown bound state '{name}'"))))
}
