//! Reads a list of preprocessed C inputs, finds the declarations that
//! belong to the given target files, and writes one translation unit
//! that registers them with the reflection registry at startup.
//!
//! The pipeline is a straight read -> parse -> write: [`target`] and
//! [`config`] load the two input files and the scalar archetype table,
//! [`parser::Parser`] walks each preprocessed input exactly once,
//! mutating a shared [`sections::Sections`], and [`run`] writes the
//! assembled result to the product path.

pub mod archetype;
pub mod config;
pub mod error;
pub mod lexer;
pub mod meta;
pub mod parser;
pub mod sections;
pub mod target;
pub mod typeinfo;

use error::ReflectionError;
use parser::Parser;
use sections::Sections;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use target::{load_input_list, IncludedFiles, TargetList};

/// The four command-line arguments the binary is invoked with, in order:
/// product path, unit name, target list path, input list path.
pub struct RunArgs<'a> {
    pub product_path: &'a Path,
    pub unit_name: &'a str,
    pub target_list_path: &'a Path,
    pub input_list_path: &'a Path,
    pub scalar_table_override: Option<&'a Path>,
}

pub fn run(args: RunArgs<'_>) -> Result<(), ReflectionError> {
    let mut targets = TargetList::load(args.target_list_path)?;
    let inputs = load_input_list(args.input_list_path)?;
    let config = config::ReflectionConfig::load(args.scalar_table_override)
        .map_err(ReflectionError::Arguments)?;
    let mut included = IncludedFiles::new();
    let mut sections = Sections::new();

    for (index, input_path) in inputs.iter().enumerate() {
        tracing::debug!(input = %input_path, index, "scanning input");
        let file = File::open(input_path)
            .map_err(|e| ReflectionError::InputListLoad(format!("{input_path}: {e}")))?;
        let mut parser = Parser::new(
            BufReader::new(file),
            input_path,
            index,
            &mut targets,
            &mut included,
            &config,
            &mut sections,
        );
        parser.run()?;
    }

    if sections.registrar_is_empty() {
        tracing::warn!(unit = args.unit_name, "no target file contributed a reflected declaration");
    }

    let product = sections.assemble(args.unit_name);
    std::fs::write(args.product_path, product)
        .map_err(|e| ReflectionError::Write(format!("{}: {e}", args.product_path.display())))?;
    Ok(())
}
