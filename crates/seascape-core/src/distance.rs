//! Pairwise Euclidean distances between cell records.
//!
//! Only the strict upper triangle is stored (condensed form, row by row),
//! `n (n − 1) / 2` entries. This is the O(n²) memory ceiling of the whole
//! pipeline.
//!
//! With the `threading` feature, rows are computed on the rayon pool, each
//! writing into its own slice of the shared buffer. Each entry depends only
//! on its two records, so the result is identical to the sequential one.

#[cfg(feature = "threading")]
use rayon::prelude::*;
use tracing::debug;

use crate::matrix::CellRecords;

/// Condensed symmetric distance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f64>,
}

impl DistanceMatrix {
    /// Wrap a condensed upper triangle of `n` points.
    pub fn from_condensed(n: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), n * n.saturating_sub(1) / 2, "condensed length mismatch");
        Self { n, data }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Index of `(i, j)` with `i < j` in the condensed vector.
    #[inline]
    pub(crate) fn index(n: usize, i: usize, j: usize) -> usize {
        debug_assert!(i < j && j < n);
        i * (2 * n - i - 1) / 2 + (j - i - 1)
    }

    #[inline]
    pub fn get(&self, a: usize, b: usize) -> f64 {
        match a.cmp(&b) {
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Less => self.data[Self::index(self.n, a, b)],
            std::cmp::Ordering::Greater => self.data[Self::index(self.n, b, a)],
        }
    }

    pub fn condensed(&self) -> &[f64] {
        &self.data
    }

    pub(crate) fn into_condensed(self) -> Vec<f64> {
        self.data
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().filter(|d| d.is_finite()).fold(0.0, f64::max)
    }
}

/// Plain Euclidean distance. Both slices must be free of `NaN`.
#[inline]
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

/// Euclidean distance over dimensions both vectors observe, scaled up by
/// `sqrt(p / shared)` so pairs with gaps stay comparable to complete pairs.
/// Returns `None` when the vectors share no observed dimension.
#[inline]
pub fn euclidean_pairwise_complete(a: &[f64], b: &[f64]) -> Option<f64> {
    let mut ss = 0.0;
    let mut shared = 0usize;
    for (x, y) in a.iter().zip(b) {
        if !x.is_nan() && !y.is_nan() {
            ss += (x - y).powi(2);
            shared += 1;
        }
    }
    if shared == 0 {
        return None;
    }
    Some((ss * a.len() as f64 / shared as f64).sqrt())
}

fn fill_row(records: &CellRecords, i: usize, pairwise: bool, out: &mut [f64]) {
    let a = records.record(i);
    for (slot, j) in out.iter_mut().zip(i + 1..records.len()) {
        let b = records.record(j);
        *slot = if pairwise {
            euclidean_pairwise_complete(a, b).unwrap_or(f64::INFINITY)
        } else {
            euclidean(a, b)
        };
    }
}

/// Split the condensed buffer into one mutable slice per row.
fn row_slices(data: &mut [f64], n: usize) -> Vec<(usize, &mut [f64])> {
    let mut rows = Vec::with_capacity(n);
    let mut rest = data;
    for i in 0..n {
        let (row, tail) = std::mem::take(&mut rest).split_at_mut(n - i - 1);
        rows.push((i, row));
        rest = tail;
    }
    rows
}

/// Compute all pairwise distances.
///
/// The condensed buffer is allocated once and filled row by row, so peak
/// memory is one condensed matrix. Records with missing entries use
/// [`euclidean_pairwise_complete`]; a pair with no shared dimension is given
/// the largest finite distance found.
pub fn pairwise_distances(records: &CellRecords) -> DistanceMatrix {
    let n = records.len();
    let pairwise = records.has_missing();
    let mut data = vec![0.0f64; n * n.saturating_sub(1) / 2];

    let rows = row_slices(&mut data, n);
    #[cfg(feature = "threading")]
    rows.into_par_iter().for_each(|(i, out)| fill_row(records, i, pairwise, out));
    #[cfg(not(feature = "threading"))]
    rows.into_iter().for_each(|(i, out)| fill_row(records, i, pairwise, out));

    if pairwise {
        let ceiling = data.iter().copied().filter(|d| d.is_finite()).fold(0.0, f64::max);
        let mut unresolved = 0usize;
        for d in data.iter_mut().filter(|d| d.is_infinite()) {
            *d = ceiling;
            unresolved += 1;
        }
        debug!(unresolved, ceiling, "Pairs without shared observations");
    }
    debug!(n, n_pairs = data.len(), "Computed pairwise distances");
    DistanceMatrix::from_condensed(n, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{CellKey, FeatureColumn, FeatureMatrix};
    use approx::assert_relative_eq;

    fn records(rows: &[&[f64]]) -> CellRecords {
        let dims = rows[0].len();
        let keys = (0..rows.len()).map(|i| CellKey { lon: i as f64, lat: 0.0 }).collect();
        let columns = (0..dims)
            .map(|c| FeatureColumn {
                label: format!("v_{c}"),
                values: rows.iter().map(|r| r[c]).collect(),
            })
            .collect();
        FeatureMatrix::from_columns(keys, columns).unwrap().records()
    }

    #[test]
    fn condensed_index_walks_upper_triangle() {
        let n = 5;
        let mut expected = 0;
        for i in 0..n {
            for j in i + 1..n {
                assert_eq!(DistanceMatrix::index(n, i, j), expected);
                expected += 1;
            }
        }
    }

    #[test]
    fn distances_are_symmetric_with_zero_diagonal() {
        let r = records(&[&[0.0, 0.0], &[3.0, 4.0], &[-1.0, 2.5], &[6.0, -2.0]]);
        let d = pairwise_distances(&r);
        for a in 0..4 {
            assert_eq!(d.get(a, a), 0.0);
            for b in 0..4 {
                assert_eq!(d.get(a, b), d.get(b, a));
            }
        }
        assert_relative_eq!(d.get(0, 1), 5.0);
    }

    #[test]
    fn pairwise_complete_rescales_by_observed_fraction() {
        let nan = f64::NAN;
        // Shared dims: only the first, diff 2 → sqrt(4 * 2 / 1).
        let got = euclidean_pairwise_complete(&[1.0, nan], &[3.0, 5.0]).unwrap();
        assert_relative_eq!(got, 8.0f64.sqrt());
        assert!(euclidean_pairwise_complete(&[1.0, nan], &[nan, 5.0]).is_none());
    }

    #[test]
    fn pairs_without_overlap_get_the_ceiling() {
        let nan = f64::NAN;
        let r = records(&[&[0.0, nan], &[nan, 1.0], &[3.0, 1.0]]);
        let d = pairwise_distances(&r);
        assert!(d.condensed().iter().all(|v| v.is_finite()));
        assert_eq!(d.get(0, 1), d.max());
    }

    #[test]
    fn condensed_buffer_is_exactly_sized_and_row_ordered() {
        let pts: Vec<[f64; 2]> = (0..9).map(|i| [i as f64 * 0.5, ((i * 7) % 5) as f64]).collect();
        let rows: Vec<&[f64]> = pts.iter().map(|p| p.as_slice()).collect();
        let d = pairwise_distances(&records(&rows));
        assert_eq!(d.data.len(), 9 * 8 / 2);
        assert_eq!(d.data.capacity(), d.data.len(), "no slack or second buffer");
        let mut idx = 0;
        for i in 0..9 {
            for j in i + 1..9 {
                assert_eq!(d.condensed()[idx], euclidean(&pts[i], &pts[j]));
                idx += 1;
            }
        }
    }

    #[test]
    fn single_record_has_empty_matrix() {
        let d = pairwise_distances(&records(&[&[1.0, 2.0]]));
        assert_eq!(d.n(), 1);
        assert!(d.condensed().is_empty());
    }
}
