//! Reflection Preprocessor CLI
//!
//! `reflection_preprocessor PRODUCT UNIT TARGET_LIST INPUT_LIST` reads the
//! preprocessed inputs listed in INPUT_LIST, keeps the declarations that
//! belong to a file in TARGET_LIST, and writes the generated registrar
//! translation unit to PRODUCT.

use clap::Parser as ClapParser;
use kan_reflection_gen::{run, RunArgs};
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "reflection_preprocessor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate a reflection registrar translation unit from annotated C declarations")]
struct Cli {
    /// Output path for the generated registrar translation unit
    product: PathBuf,

    /// C identifier fragment used to name the generated registrar function
    unit: String,

    /// File listing the target paths whose declarations should be reflected
    target_list: PathBuf,

    /// File listing the preprocessed input files to scan
    input_list: PathBuf,

    /// Override the embedded scalar-to-archetype table
    #[arg(long, value_name = "PATH")]
    scalar_table: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let args = RunArgs {
        product_path: &cli.product,
        unit_name: &cli.unit,
        target_list_path: &cli.target_list,
        input_list_path: &cli.input_list,
        scalar_table_override: cli.scalar_table.as_deref(),
    };

    if let Err(err) = run(args) {
        tracing::error!(%err, "reflection_preprocessor failed");
        eprintln!("reflection_preprocessor: {err}");
        process::exit(err.exit_code());
    }
}
