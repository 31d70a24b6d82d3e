//! Complete-linkage agglomerative clustering.
//!
//! Starting from one cluster per cell, every step merges the two clusters
//! whose complete-linkage distance (largest member-to-member distance) is
//! smallest, until a single cluster remains. Distances between clusters are
//! kept up to date with the Lance–Williams rule for complete linkage:
//!
//! ```text
//!   d(k, i ∪ j) = max(d(k, i), d(k, j))
//! ```
//!
//! Clusters occupy slots `0..n`; a merged cluster keeps the lower slot of its
//! two parts. Ties are broken towards the lowest `(slot i, slot j)` pair, so
//! identical input always yields the identical dendrogram.
//!
//! Each active slot caches its nearest neighbour among higher slots. Because
//! complete-linkage distances only grow after a merge, a cache is only stale
//! when it points at one of the two merged slots, and only those are
//! rescanned. Time is O(n²) in the common case, memory is the condensed
//! distance matrix. Beyond roughly 15 000 cells this is impractical.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::distance::DistanceMatrix;

const NONE: usize = usize::MAX;

/// One agglomeration step.
///
/// Node ids follow the usual dendrogram convention: leaves are `0..n`, the
/// cluster created by merge `t` is `n + t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    /// Complete-linkage distance at which the two clusters joined.
    pub height: f64,
    /// Number of cells in the merged cluster.
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dendrogram {
    pub n_leaves: usize,
    pub merges: Vec<Merge>,
}

impl Dendrogram {
    pub fn heights(&self) -> Vec<f64> {
        self.merges.iter().map(|m| m.height).collect()
    }

    /// True if heights never decrease, which complete linkage guarantees.
    pub fn is_monotone(&self) -> bool {
        self.merges.windows(2).all(|w| w[0].height <= w[1].height)
    }
}

struct Workspace {
    n: usize,
    dist: Vec<f64>,
    active: Vec<bool>,
    nn: Vec<usize>,
    nn_dist: Vec<f64>,
}

impl Workspace {
    #[inline]
    fn get(&self, a: usize, b: usize) -> f64 {
        if a < b {
            self.dist[DistanceMatrix::index(self.n, a, b)]
        } else {
            self.dist[DistanceMatrix::index(self.n, b, a)]
        }
    }

    #[inline]
    fn set(&mut self, a: usize, b: usize, v: f64) {
        let idx = if a < b {
            DistanceMatrix::index(self.n, a, b)
        } else {
            DistanceMatrix::index(self.n, b, a)
        };
        self.dist[idx] = v;
    }

    /// Nearest active slot above `i`; the lowest slot wins ties.
    fn rescan(&mut self, i: usize) {
        let mut best = NONE;
        let mut best_d = f64::INFINITY;
        for j in i + 1..self.n {
            if !self.active[j] {
                continue;
            }
            let d = self.get(i, j);
            if best == NONE || d < best_d {
                best = j;
                best_d = d;
            }
        }
        self.nn[i] = best;
        self.nn_dist[i] = best_d;
    }

    /// Active slot with the globally smallest cached distance; lowest slot on ties.
    fn closest_pair(&self) -> Option<(usize, usize, f64)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..self.n {
            if !self.active[i] || self.nn[i] == NONE {
                continue;
            }
            match best {
                Some((_, _, d)) if self.nn_dist[i] >= d => {}
                _ => best = Some((i, self.nn[i], self.nn_dist[i])),
            }
        }
        best
    }
}

/// Build the complete-linkage dendrogram for the points behind `distances`.
///
/// Non-finite distances are treated as `+∞` and merged last.
pub fn complete_linkage(distances: DistanceMatrix) -> Dendrogram {
    let n = distances.n();
    let mut dist = distances.into_condensed();
    for d in dist.iter_mut().filter(|d| d.is_nan()) {
        *d = f64::INFINITY;
    }

    let mut ws = Workspace {
        n,
        dist,
        active: vec![true; n],
        nn: vec![NONE; n],
        nn_dist: vec![f64::INFINITY; n],
    };
    for i in 0..n {
        ws.rescan(i);
    }

    let mut node_id: Vec<usize> = (0..n).collect();
    let mut size = vec![1usize; n];
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    while let Some((i, j, height)) = ws.closest_pair() {
        merges.push(Merge {
            left: node_id[i],
            right: node_id[j],
            height,
            size: size[i] + size[j],
        });

        for k in 0..n {
            if ws.active[k] && k != i && k != j {
                let d = ws.get(k, i).max(ws.get(k, j));
                ws.set(k, i, d);
            }
        }
        ws.active[j] = false;
        node_id[i] = n + merges.len() - 1;
        size[i] += size[j];

        for k in 0..n {
            if ws.active[k] && (k == i || ws.nn[k] == i || ws.nn[k] == j) {
                ws.rescan(k);
            }
        }
    }

    debug!(n_leaves = n, n_merges = merges.len(), "Complete-linkage agglomeration finished");
    Dendrogram { n_leaves: n, merges }
}
