//! Binary serialization engine (§3.3, §4.3): compiles each reflected
//! type's fields into a flat [`script::Script`] once (cached in a
//! [`cache::ScriptCache`]), then replays that script step-by-step
//! through a [`writer::Writer`] or [`reader::Reader`] against a byte
//! stream. No single call does unbounded work - every step handles at
//! most one command, so many instances can be serialized cooperatively
//! without a dedicated thread per instance.
//!
//! This crate has no executable of its own (§6): it's driven by the
//! generated registrar code that R emits and the expanded query code
//! that U emits, neither of which exists until those tools run.

pub mod cache;
pub mod condition;
pub mod error;
pub mod instance;
pub mod interned;
pub mod patch;
pub mod reader;
pub mod reflect;
pub mod script;
pub mod step;
pub mod wire;
pub mod writer;

use cache::ScriptCache;
use error::ScriptError;
use instance::Instance;
use interned::{InternedStringPool, InternedStringRegistry};
use reader::Reader;
use reflect::TypeRegistry;
use step::StepOutcome;
use std::io::{self, Read, Write};
use writer::Writer;

/// Convenience wrapper for callers that don't need cooperative
/// multiplexing: drives a [`Writer`] to completion in one call.
pub fn write_instance<W: Write>(
    type_name: &str,
    instance: &Instance,
    registry: &dyn TypeRegistry,
    cache: &ScriptCache,
    interned_registry: Option<&InternedStringRegistry>,
    pool: &InternedStringPool,
    out: &mut W,
) -> io::Result<()> {
    let mut writer = Writer::new(type_name, instance, registry, cache, interned_registry, pool).map_err(script_error_to_io)?;
    match writer.run_to_completion(out) {
        StepOutcome::Finished => Ok(()),
        StepOutcome::Failed => Err(execution_failed()),
        StepOutcome::InProgress => unreachable!("run_to_completion only returns a terminal outcome"),
    }
}

/// Convenience wrapper mirroring [`write_instance`] for the read side.
pub fn read_instance<R: Read>(
    type_name: &str,
    registry: &dyn TypeRegistry,
    cache: &ScriptCache,
    interned_registry: Option<&InternedStringRegistry>,
    pool: &InternedStringPool,
    input: &mut R,
) -> io::Result<Instance> {
    let mut reader = Reader::new(type_name, registry, cache, interned_registry, pool).map_err(script_error_to_io)?;
    match reader.run_to_completion(input) {
        StepOutcome::Finished => Ok(reader.into_instance().expect("a finished reader always produced an instance")),
        StepOutcome::Failed => Err(execution_failed()),
        StepOutcome::InProgress => unreachable!("run_to_completion only returns a terminal outcome"),
    }
}

fn script_error_to_io(e: ScriptError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

fn execution_failed() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "script execution failed")
}
