/// Input inspection tool: loads every variable group under an input directory
/// and reports layer count, date range, grid shape and missing fraction,
/// without clustering anything. Useful for checking a download before a run.
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use seascape_core::loader::load_catalog;
use seascape_core::output::write_json;
use seascape_core::{DispatchReader, PipelineConfig};

#[derive(Parser, Debug)]
#[command(
    name = "grid_inspect",
    about = "Summarize raster groups (layers, dates, grid, missing fraction) without clustering"
)]
struct Args {
    /// Read the input directory and variable list from a run config
    #[arg(short, long, conflicts_with = "input_dir")]
    config: Option<PathBuf>,

    /// Input directory with one sub-directory per variable
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Variables to inspect (default: every sub-directory of the input directory)
    #[arg(long, value_delimiter = ',')]
    variables: Vec<String>,

    /// Write the summary as JSON instead of printing a table
    #[arg(long)]
    json: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn list_variable_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let (input_dir, mut variables) = match (&args.config, &args.input_dir) {
        (Some(path), _) => {
            let cfg = PipelineConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            (cfg.input_dir, cfg.variables)
        }
        (None, Some(dir)) => (dir.clone(), Vec::new()),
        (None, None) => bail!("either --config or --input-dir is required"),
    };
    if !args.variables.is_empty() {
        variables = args.variables.clone();
    }
    if variables.is_empty() {
        variables = list_variable_dirs(&input_dir)?;
    }
    if variables.is_empty() {
        bail!("no variable directories under {}", input_dir.display());
    }

    let catalog = load_catalog(&DispatchReader::default(), &input_dir, &variables)
        .with_context(|| format!("loading rasters from {}", input_dir.display()))?;
    let summaries = catalog.summaries();

    if let Some(path) = &args.json {
        write_json(&summaries, path).with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote {} group summaries to {}", summaries.len(), path.display());
        return Ok(());
    }

    println!(
        "{:<12} {:>7} {:>11} {:>11} {:>6} {:>6} {:>8}",
        "variable", "layers", "first", "last", "n_lon", "n_lat", "missing"
    );
    println!("{}", "-".repeat(68));
    for s in &summaries {
        println!(
            "{:<12} {:>7} {:>11} {:>11} {:>6} {:>6} {:>7.1}%",
            s.variable,
            s.n_layers,
            s.first_date.to_string(),
            s.last_date.to_string(),
            s.n_lon,
            s.n_lat,
            s.missing_fraction * 100.0
        );
    }

    if let Some((variable, axis)) = catalog.grid_mismatch() {
        println!(
            "\nwarning: {axis} coordinates of '{variable}' differ from '{}'; assembly will fail",
            variables[0]
        );
    }
    Ok(())
}
