//! End-to-end orchestration: load → assemble → filter → normalize →
//! cluster → partition.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{PipelineConfig, PRACTICAL_CELL_LIMIT};
use crate::distance::pairwise_distances;
use crate::error::{RegimeError, RegimeResult};
use crate::filter::drop_empty_rows;
use crate::linkage::{complete_linkage, Dendrogram};
use crate::loader::{load_catalog, RasterReader};
use crate::matrix::assemble;
use crate::normalize::{apply_missing_policy, standardize, ColumnStats};
use crate::partition::{extract_partitions, summarize, ClusterSummary, PartitionTable};
use crate::raster::VariableCatalog;

/// Counts collected along one run, written next to the table on request.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub variables: Vec<String>,
    /// Cells inside the bounding box before filtering.
    pub rows_in_bbox: usize,
    pub rows_all_missing: usize,
    pub rows_incomplete_dropped: usize,
    pub rows_clustered: usize,
    pub columns: Vec<ColumnStats>,
    pub degenerate_columns: Vec<String>,
    pub ks_produced: Vec<usize>,
    pub ks_skipped: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct RegimeOutcome {
    pub table: PartitionTable,
    pub dendrogram: Dendrogram,
    pub report: RunReport,
}

impl RegimeOutcome {
    /// Per-cluster extents for every extracted k, keyed by k.
    pub fn summaries(&self) -> Vec<(usize, Vec<ClusterSummary>)> {
        self.table
            .partitions
            .iter()
            .map(|p| (p.k, summarize(&self.table.keys, p)))
            .collect()
    }
}

/// Run the whole pipeline from rasters on disk.
pub fn run_pipeline(config: &PipelineConfig, reader: &dyn RasterReader) -> RegimeResult<RegimeOutcome> {
    config.validate()?;
    info!(
        input_dir = %config.input_dir.display(),
        variables = ?config.variables,
        "Loading rasters"
    );
    let catalog = load_catalog(reader, &config.input_dir, &config.variables)?;
    run_on_catalog(catalog, config)
}

/// Run every stage after loading on an in-memory catalog.
///
/// `config.input_dir` and `config.variables` are ignored; columns follow the
/// catalog's insertion order.
pub fn run_on_catalog(catalog: VariableCatalog, config: &PipelineConfig) -> RegimeResult<RegimeOutcome> {
    config.bbox.validate()?;
    let variables: Vec<String> = catalog.variables().into_iter().map(str::to_owned).collect();

    let matrix = assemble(catalog, &config.bbox)?;
    info!(rows = matrix.n_rows(), cols = matrix.n_cols(), "Assembled feature matrix");

    let (matrix, filter) = drop_empty_rows(matrix)?;
    let (matrix, columns) = standardize(matrix, config.degenerate_policy)?;
    let (matrix, incomplete) = apply_missing_policy(matrix, config.missing_policy)?;

    let n_cells = matrix.n_rows();
    if n_cells > config.max_cells {
        return Err(RegimeError::TooManyCells {
            n_cells,
            max_cells: config.max_cells,
        });
    }
    if n_cells > PRACTICAL_CELL_LIMIT {
        warn!(n_cells, limit = PRACTICAL_CELL_LIMIT, "Cell count is beyond what complete linkage handles well");
    }

    let records = matrix.records();
    drop(matrix);
    let distances = pairwise_distances(&records);
    let dendrogram = complete_linkage(distances);
    info!(
        n_cells,
        top_height = dendrogram.merges.last().map_or(0.0, |m| m.height),
        "Clustered cells"
    );

    let (table, ks_skipped) =
        extract_partitions(&dendrogram, &records.keys, &config.cluster_counts, config.invalid_k_policy)?;

    let report = RunReport {
        variables,
        rows_in_bbox: filter.rows_in,
        rows_all_missing: filter.rows_dropped,
        rows_incomplete_dropped: incomplete,
        rows_clustered: n_cells,
        degenerate_columns: columns.iter().filter(|c| c.degenerate).map(|c| c.label.clone()).collect(),
        columns,
        ks_produced: table.ks(),
        ks_skipped,
    };
    Ok(RegimeOutcome {
        table,
        dendrogram,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BoundingBox;
    use crate::normalize::{DegeneratePolicy, MissingPolicy};
    use crate::raster::{RasterLayer, VariableGroup};
    use chrono::NaiveDate;
    use std::path::PathBuf;

    const LON: [f64; 3] = [150.5, 151.5, 152.5];
    const LAT: [f64; 2] = [-30.5, -31.5];

    fn group(var: &str, values: &[[f32; 6]]) -> VariableGroup {
        let layers = values
            .iter()
            .enumerate()
            .map(|(d, v)| {
                RasterLayer::new(
                    var,
                    NaiveDate::from_ymd_opt(2016, d as u32 + 1, 1).unwrap(),
                    LON.to_vec(),
                    LAT.to_vec(),
                    v.to_vec(),
                    PathBuf::from(format!("{var}_{d}.json")),
                )
                .unwrap()
            })
            .collect();
        VariableGroup::new(var, layers).unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new("unused", vec!["a".into(), "b".into()], BoundingBox::new(150.0, 153.0, -32.0, -30.0))
    }

    fn catalog(a: &[[f32; 6]], b: &[[f32; 6]]) -> VariableCatalog {
        let mut c = VariableCatalog::new();
        c.insert(group("a", a)).unwrap();
        c.insert(group("b", b)).unwrap();
        c
    }

    #[test]
    fn small_grid_runs_and_caps_k_at_cell_count() {
        let nan = f32::NAN;
        let a = [[1.0, 1.1, 9.0, 9.2, 5.0, nan], [1.2, 1.0, 9.1, 9.0, 5.1, nan]];
        let b = [[0.0, 0.1, 3.0, 3.1, 7.0, nan], [0.2, 0.0, 3.2, 3.0, 7.2, nan]];
        let outcome = run_on_catalog(catalog(&a, &b), &config()).unwrap();

        assert_eq!(outcome.report.rows_in_bbox, 6);
        assert_eq!(outcome.report.rows_all_missing, 1);
        assert_eq!(outcome.table.n_rows(), 5);
        assert_eq!(outcome.table.ks(), vec![2, 3, 4, 5]);
        assert_eq!(outcome.report.ks_skipped, (6..=12).collect::<Vec<_>>());
        assert_eq!(outcome.dendrogram.n_leaves, 5);

        let k3 = outcome.table.column(3).unwrap();
        assert_eq!(k3.labels, vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn partial_rows_follow_the_missing_policy() {
        let nan = f32::NAN;
        let a = [[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [1.5, nan, 3.5, 4.5, 5.5, 6.5]];
        let b = [[6.0, 5.0, 4.0, 3.0, 2.0, 1.0], [6.5, 5.5, 4.5, 3.5, 2.5, 1.5]];

        let dropped = run_on_catalog(catalog(&a, &b), &config()).unwrap();
        assert_eq!(dropped.report.rows_incomplete_dropped, 1);
        assert_eq!(dropped.table.n_rows(), 5);

        let mut cfg = config();
        cfg.missing_policy = MissingPolicy::ImputeMean;
        let imputed = run_on_catalog(catalog(&a, &b), &cfg).unwrap();
        assert_eq!(imputed.table.n_rows(), 6);

        cfg.missing_policy = MissingPolicy::PairwiseIgnore;
        let pairwise = run_on_catalog(catalog(&a, &b), &cfg).unwrap();
        assert_eq!(pairwise.table.n_rows(), 6);
    }

    #[test]
    fn constant_column_fails_unless_policy_allows_it() {
        let a = [[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2.0, 3.0, 4.0, 5.0, 6.0, 7.0]];
        let b = [[4.0; 6], [6.0, 5.0, 4.0, 3.0, 2.0, 1.0]];

        let err = run_on_catalog(catalog(&a, &b), &config()).unwrap_err();
        assert!(matches!(err, RegimeError::DegenerateColumn { ref column, .. } if column == "b_2016-01-01"));

        let mut cfg = config();
        cfg.degenerate_policy = DegeneratePolicy::Drop;
        let outcome = run_on_catalog(catalog(&a, &b), &cfg).unwrap();
        assert_eq!(outcome.report.degenerate_columns, vec!["b_2016-01-01".to_string()]);
    }

    #[test]
    fn sparse_zeroed_column_keeps_every_row() {
        let nan = f32::NAN;
        let a = [[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2.0, 3.5, 4.0, 5.5, 6.0, 7.5]];
        let mut c = VariableCatalog::new();
        c.insert(group("a", &a)).unwrap();
        c.insert(group("b", &[[nan, nan, nan, 4.2, nan, nan]])).unwrap();

        let mut cfg = config();
        cfg.degenerate_policy = DegeneratePolicy::Zero;
        let outcome = run_on_catalog(c, &cfg).unwrap();
        assert_eq!(outcome.report.rows_all_missing, 0);
        assert_eq!(outcome.report.rows_incomplete_dropped, 0);
        assert_eq!(outcome.report.rows_clustered, 6);
        assert_eq!(outcome.report.degenerate_columns, vec!["b_2016-01-01".to_string()]);
        assert_eq!(outcome.table.ks(), vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn cell_ceiling_is_enforced() {
        let a = [[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]];
        let b = [[6.0, 5.0, 4.0, 3.0, 2.0, 1.0]];
        let mut cfg = config();
        cfg.max_cells = 4;
        let err = run_on_catalog(catalog(&a, &b), &cfg).unwrap_err();
        assert!(matches!(err, RegimeError::TooManyCells { n_cells: 6, max_cells: 4 }));
    }
}
