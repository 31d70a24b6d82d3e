//! Row filter: drops cells that were never observed.

use serde::Serialize;
use tracing::info;

use crate::error::{RegimeError, RegimeResult};
use crate::matrix::FeatureMatrix;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FilterReport {
    pub rows_in: usize,
    pub rows_dropped: usize,
    pub rows_kept: usize,
}

/// Remove rows where every feature column is missing (land, permanent cloud).
///
/// A row with a single valid observation is kept. Fails with
/// [`RegimeError::EmptyMatrix`] if nothing survives.
pub fn drop_empty_rows(matrix: FeatureMatrix) -> RegimeResult<(FeatureMatrix, FilterReport)> {
    let rows_in = matrix.n_rows();
    let keep: Vec<bool> = (0..rows_in).map(|r| !matrix.row_is_empty(r)).collect();
    let rows_kept = keep.iter().filter(|&&k| k).count();
    if rows_kept == 0 {
        return Err(RegimeError::EmptyMatrix { stage: "removing fully-missing rows" });
    }
    let report = FilterReport {
        rows_in,
        rows_dropped: rows_in - rows_kept,
        rows_kept,
    };
    info!(rows_in, rows_dropped = report.rows_dropped, "Dropped fully-missing rows");
    Ok((matrix.retain_rows(&keep), report))
}
