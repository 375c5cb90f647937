//! Expands `KAN_UP_*` repository-query macros into explicit cursor and
//! access boilerplate in two passes over the same input: scan discovers
//! every query field per bound state, emit re-walks the identical bytes
//! and writes the expanded output.

pub mod error;
pub mod macros;
pub mod mangle;
pub mod state;
pub mod walker;

use error::UniverseError;
use state::UniverseStates;
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub struct RunArgs<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
}

pub fn run(args: RunArgs<'_>) -> Result<(), UniverseError> {
    let mut states = UniverseStates::new();
    let input_path = args.input.to_string_lossy().to_string();

    let scan_source = File::open(args.input).map_err(|e| UniverseError::InputOpen(e.to_string()))?;
    walker::Walker::scan(scan_source, &input_path, &mut states)?;

    let emit_source = File::open(args.input).map_err(|e| UniverseError::InputOpen(e.to_string()))?;
    let text = walker::Walker::emit(emit_source, &input_path, &mut states)?;

    let mut out = File::create(args.output).map_err(|e| UniverseError::OutputOpen(e.to_string()))?;
    out.write_all(text.as_bytes())
        .map_err(|e| UniverseError::OutputOpen(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    #[test]
    fn end_to_end_expands_a_singleton_read_query() {
        let dir = tempdir().unwrap();
        let input_path = dir.path().join("mutator.c");
        let mut input = File::create(&input_path).unwrap();
        writeln!(input, "void KAN_UP_GENERATE_STATE_QUERIES (my_state_t);").unwrap();
        writeln!(input, "void my_mutator (my_state_t *state)").unwrap();
        writeln!(input, "{{").unwrap();
        writeln!(input, "KAN_UP_BIND_STATE (my_state_t, state);").unwrap();
        writeln!(input, "KAN_UP_SINGLETON_READ (a, TypeA)").unwrap();
        writeln!(input, "{{").unwrap();
        writeln!(input, "do_something (a);").unwrap();
        writeln!(input, "}}").unwrap();
        writeln!(input, "}}").unwrap();

        let output_path = dir.path().join("mutator.generated.c");
        run(RunArgs { input: &input_path, output: &output_path }).unwrap();

        let text = std::fs::read_to_string(&output_path).unwrap();
        assert!(text.contains("kan_repository_read__TypeA_query_t read__TypeA"));
        assert!(text.contains("kan_repository_read__TypeA_access_t a_access"));
        assert!(text.contains("do_something (a);"));
        assert!(text.contains("kan_repository_read__TypeA_access_close (&a_access);"));
    }

    #[test]
    fn missing_input_is_an_input_open_error() {
        let dir = tempdir().unwrap();
        let err = run(RunArgs {
            input: &dir.path().join("nope.c"),
            output: &dir.path().join("out.c"),
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), -2);
    }
}
