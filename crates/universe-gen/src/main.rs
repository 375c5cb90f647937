//! Universe Preprocessor CLI
//!
//! `universe_preprocessor INPUT OUTPUT` expands `KAN_UP_*` repository-query
//! macros in INPUT, a single preprocessed translation unit, and writes the
//! expanded C source to OUTPUT.

use clap::Parser as ClapParser;
use kan_universe_gen::{run, RunArgs};
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "universe_preprocessor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Expand KAN_UP_* repository-query macros into explicit query boilerplate")]
struct Cli {
    /// Preprocessed input translation unit
    input: PathBuf,

    /// Output path for the expanded translation unit
    output: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let args = RunArgs { input: &cli.input, output: &cli.output };

    if let Err(err) = run(args) {
        tracing::error!(%err, "universe_preprocessor failed");
        eprintln!("universe_preprocessor: {err}");
        process::exit(err.exit_code());
    }
}
