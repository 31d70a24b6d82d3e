/// Regionalization CLI: loads the rasters named in a run config, clusters the
/// ocean cells with complete linkage and writes one label column per cluster
/// count.
///
/// Output table: `lon,lat,k_2,...,k_12` (CSV) or an array of row objects (JSON).
/// Optional artifacts: dendrogram JSON, per-k cluster summaries, run report.
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use seascape_core::output::{write_json, write_table};
use seascape_core::partition::ClusterSummary;
use seascape_core::{run_pipeline, DispatchReader, PipelineConfig, TableFormat};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "regionalize",
    about = "Cluster gridded ocean observations into regimes at several cluster counts"
)]
struct Args {
    /// Path to the run config (JSON)
    #[arg(short, long, default_value = "data/regionalize.json")]
    config: PathBuf,

    /// Override the config's input directory
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Output table path (parent directories are created)
    #[arg(short, long, default_value = "data/regions.csv")]
    output: PathBuf,

    /// Table format; guessed from the output extension when omitted
    #[arg(long, value_parser = parse_format)]
    format: Option<TableFormat>,

    /// Smallest cluster count, at least 2 (with --k-max, replaces the config's list)
    #[arg(long, requires = "k_max")]
    k_min: Option<usize>,

    /// Largest cluster count
    #[arg(long, requires = "k_min")]
    k_max: Option<usize>,

    /// Also write the dendrogram as JSON
    #[arg(long)]
    dendrogram: Option<PathBuf>,

    /// Also write per-k cluster extents and centroids as JSON
    #[arg(long)]
    summaries: Option<PathBuf>,

    /// Also write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn parse_format(s: &str) -> std::result::Result<TableFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "csv" => Ok(TableFormat::Csv),
        "json" => Ok(TableFormat::Json),
        other => Err(format!("unknown table format '{other}' (expected csv or json)")),
    }
}

#[derive(Serialize)]
struct KSummary {
    k: usize,
    clusters: Vec<ClusterSummary>,
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_json);

    let mut config = PipelineConfig::from_file(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if let Some(dir) = args.input_dir {
        config.input_dir = dir;
    }
    if let (Some(lo), Some(hi)) = (args.k_min, args.k_max) {
        if lo < 2 || lo > hi {
            bail!("invalid cluster count range {lo}..={hi}");
        }
        config.cluster_counts = (lo..=hi).collect();
    }

    let reader = DispatchReader::default();
    let outcome = run_pipeline(&config, &reader).context("regionalization failed")?;

    let format = args.format.unwrap_or_else(|| TableFormat::from_path(&args.output));
    write_table(&outcome.table, &args.output, format)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(
        path = %args.output.display(),
        rows = outcome.table.n_rows(),
        ks = ?outcome.table.ks(),
        "Wrote partition table"
    );

    if let Some(path) = &args.dendrogram {
        write_json(&outcome.dendrogram, path).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Wrote dendrogram");
    }
    if let Some(path) = &args.summaries {
        let summaries: Vec<KSummary> = outcome
            .summaries()
            .into_iter()
            .map(|(k, clusters)| KSummary { k, clusters })
            .collect();
        write_json(&summaries, path).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Wrote cluster summaries");
    }
    if let Some(path) = &args.report {
        write_json(&outcome.report, path).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Wrote run report");
    }

    println!(
        "{} cells clustered, {} partitions written to {}",
        outcome.report.rows_clustered,
        outcome.table.partitions.len(),
        args.output.display()
    );
    Ok(())
}
