//! Column standardization and the missing-value policy applied before
//! distances are computed.
//!
//! Raw variables live on unrelated scales (°C, mg m⁻³, E m⁻² d⁻¹, m⁻¹), so
//! every column is rescaled to zero mean and unit sample standard deviation.
//! Without this the variable with the largest magnitude dominates every
//! distance.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RegimeError, RegimeResult};
use crate::matrix::{FeatureColumn, FeatureMatrix};

/// What to do with a column whose standard deviation is zero or undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneratePolicy {
    /// Abort with [`RegimeError::DegenerateColumn`].
    #[default]
    Fail,
    /// Replace every entry, missing or not, with 0; the column adds nothing
    /// to distances and never marks a row incomplete.
    Zero,
    /// Remove the column.
    Drop,
}

/// How rows that still hold missing values reach the distance engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Remove rows with any missing entry before clustering.
    #[default]
    DropIncomplete,
    /// Fill missing entries with the column mean (0 after standardization).
    ImputeMean,
    /// Keep gaps; distances use only dimensions both rows observe.
    PairwiseIgnore,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnStats {
    pub label: String,
    pub mean: f64,
    /// Sample standard deviation (n − 1 denominator).
    pub sd: f64,
    pub n_valid: usize,
    /// Set when the column was zeroed or dropped as degenerate.
    pub degenerate: bool,
}

/// Mean and sample sd over the non-missing entries.
pub fn column_moments(values: &[f64]) -> (f64, f64, usize) {
    let valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    let n = valid.len();
    if n == 0 {
        return (f64::NAN, f64::NAN, 0);
    }
    let mean = valid.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, f64::NAN, n);
    }
    let ss = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    (mean, (ss / (n - 1) as f64).sqrt(), n)
}

/// Standardize every column to `(v − mean) / sd`. Missing stays missing.
pub fn standardize(
    matrix: FeatureMatrix,
    policy: DegeneratePolicy,
) -> RegimeResult<(FeatureMatrix, Vec<ColumnStats>)> {
    let (keys, columns) = matrix.into_parts();
    let mut out = Vec::with_capacity(columns.len());
    let mut stats = Vec::with_capacity(columns.len());

    for col in columns {
        let (mean, sd, n_valid) = column_moments(&col.values);
        let degenerate = !(sd.is_finite() && sd > 0.0);

        if degenerate {
            match policy {
                DegeneratePolicy::Fail => {
                    return Err(RegimeError::DegenerateColumn {
                        column: col.label,
                        sd,
                        valid: n_valid,
                    })
                }
                DegeneratePolicy::Zero => {
                    warn!(column = %col.label, n_valid, "Degenerate column set to zero");
                    let values = vec![0.0; col.values.len()];
                    stats.push(ColumnStats { label: col.label.clone(), mean, sd, n_valid, degenerate });
                    out.push(FeatureColumn { label: col.label, values });
                }
                DegeneratePolicy::Drop => {
                    warn!(column = %col.label, n_valid, "Degenerate column dropped");
                    stats.push(ColumnStats { label: col.label, mean, sd, n_valid, degenerate });
                }
            }
            continue;
        }

        let values = col.values.iter().map(|v| (v - mean) / sd).collect();
        stats.push(ColumnStats { label: col.label.clone(), mean, sd, n_valid, degenerate });
        out.push(FeatureColumn { label: col.label, values });
    }

    if out.is_empty() {
        return Err(RegimeError::EmptyMatrix { stage: "dropping degenerate columns" });
    }
    Ok((FeatureMatrix::from_columns(keys, out)?, stats))
}

/// Apply a [`MissingPolicy`] to a standardized matrix.
///
/// Returns the matrix and the number of rows removed (`DropIncomplete`
/// only). `PairwiseIgnore` leaves the matrix unchanged.
pub fn apply_missing_policy(
    matrix: FeatureMatrix,
    policy: MissingPolicy,
) -> RegimeResult<(FeatureMatrix, usize)> {
    match policy {
        MissingPolicy::DropIncomplete => {
            let keep: Vec<bool> = (0..matrix.n_rows()).map(|r| matrix.row_is_complete(r)).collect();
            let dropped = keep.iter().filter(|&&k| !k).count();
            if dropped == matrix.n_rows() {
                return Err(RegimeError::EmptyMatrix { stage: "dropping incomplete rows" });
            }
            if dropped > 0 {
                info!(dropped, "Dropped rows with partial missing values");
            }
            Ok((matrix.retain_rows(&keep), dropped))
        }
        MissingPolicy::ImputeMean => {
            let (keys, columns) = matrix.into_parts();
            let columns = columns
                .into_iter()
                .map(|c| {
                    let (mean, _, _) = column_moments(&c.values);
                    let fill = if mean.is_finite() { mean } else { 0.0 };
                    FeatureColumn {
                        label: c.label,
                        values: c.values.into_iter().map(|v| if v.is_nan() { fill } else { v }).collect(),
                    }
                })
                .collect();
            Ok((FeatureMatrix::from_columns(keys, columns)?, 0))
        }
        MissingPolicy::PairwiseIgnore => Ok((matrix, 0)),
    }
}
