//! Partition extractor: cuts one dendrogram at several cluster counts.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RegimeError, RegimeResult};
use crate::linkage::Dendrogram;
use crate::matrix::CellKey;

/// Handling of requested cluster counts outside `1..=n_cells`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidKPolicy {
    /// Log and skip the invalid k; other counts still succeed.
    #[default]
    Skip,
    /// Abort the whole batch on the first invalid k.
    Fail,
}

/// Cluster labels for one cluster count, one per cell in row order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Partition {
    pub k: usize,
    pub labels: Vec<u32>,
}

impl Partition {
    pub fn column_name(&self) -> String {
        format!("k_{}", self.k)
    }

    pub fn n_clusters(&self) -> usize {
        self.labels.iter().max().map_or(0, |&m| m as usize + 1)
    }

    /// Cells per label.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.n_clusters()];
        for &l in &self.labels {
            sizes[l as usize] += 1;
        }
        sizes
    }
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    let mut root = x;
    while parent[root] != root {
        root = parent[root];
    }
    while parent[x] != root {
        let next = parent[x];
        parent[x] = root;
        x = next;
    }
    root
}

/// Cut `dendrogram` into exactly `k` clusters.
///
/// Applies the first `n − k` merges, which is the same as severing the
/// `k − 1` highest ones. Labels are numbered by first appearance in row
/// order, so the first cell is always in cluster 0. Label numbers carry no
/// meaning across different k.
pub fn cut(dendrogram: &Dendrogram, k: usize) -> RegimeResult<Partition> {
    let n = dendrogram.n_leaves;
    if k < 1 || k > n {
        return Err(RegimeError::InvalidK { k, n_cells: n });
    }
    let n_nodes = n + dendrogram.merges.len();
    let mut parent: Vec<usize> = (0..n_nodes).collect();
    for (t, m) in dendrogram.merges.iter().take(n - k).enumerate() {
        parent[m.left] = n + t;
        parent[m.right] = n + t;
    }

    let mut root_label = vec![u32::MAX; n_nodes];
    let mut next = 0u32;
    let mut labels = Vec::with_capacity(n);
    for leaf in 0..n {
        let root = find(&mut parent, leaf);
        if root_label[root] == u32::MAX {
            root_label[root] = next;
            next += 1;
        }
        labels.push(root_label[root]);
    }
    debug_assert_eq!(next as usize, k);
    Ok(Partition { k, labels })
}

/// Cell keys plus one label column per extracted cluster count.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionTable {
    pub keys: Vec<CellKey>,
    pub partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn n_rows(&self) -> usize {
        self.keys.len()
    }

    pub fn ks(&self) -> Vec<usize> {
        self.partitions.iter().map(|p| p.k).collect()
    }

    pub fn column(&self, k: usize) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.k == k)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.partitions.iter().map(Partition::column_name).collect()
    }
}

/// Cut `dendrogram` at every requested k.
///
/// Returns the table and the skipped counts. Fails with
/// [`RegimeError::NoPartitions`] if nothing could be extracted.
pub fn extract_partitions(
    dendrogram: &Dendrogram,
    keys: &[CellKey],
    ks: &[usize],
    policy: InvalidKPolicy,
) -> RegimeResult<(PartitionTable, Vec<usize>)> {
    let mut partitions = Vec::with_capacity(ks.len());
    let mut skipped = Vec::new();
    for &k in ks {
        match cut(dendrogram, k) {
            Ok(p) => partitions.push(p),
            Err(e @ RegimeError::InvalidK { .. }) => match policy {
                InvalidKPolicy::Fail => return Err(e),
                InvalidKPolicy::Skip => {
                    warn!(k, n_cells = dendrogram.n_leaves, "Skipping invalid cluster count");
                    skipped.push(k);
                }
            },
            Err(e) => return Err(e),
        }
    }
    if partitions.is_empty() {
        return Err(RegimeError::NoPartitions {
            requested: ks.to_vec(),
            n_cells: dendrogram.n_leaves,
        });
    }
    info!(
        ks = ?partitions.iter().map(|p| p.k).collect::<Vec<_>>(),
        "Extracted partitions"
    );
    Ok((
        PartitionTable {
            keys: keys.to_vec(),
            partitions,
        },
        skipped,
    ))
}

// ── Summaries ─────────────────────────────────────────────────────────────────

/// Spatial footprint of one cluster, for drawing polygons by hand.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub label: u32,
    pub n_cells: usize,
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
    pub centroid_lon: f64,
    pub centroid_lat: f64,
}

pub fn summarize(keys: &[CellKey], partition: &Partition) -> Vec<ClusterSummary> {
    let mut out: Vec<ClusterSummary> = (0..partition.n_clusters() as u32)
        .map(|label| ClusterSummary {
            label,
            n_cells: 0,
            lon_min: f64::INFINITY,
            lon_max: f64::NEG_INFINITY,
            lat_min: f64::INFINITY,
            lat_max: f64::NEG_INFINITY,
            centroid_lon: 0.0,
            centroid_lat: 0.0,
        })
        .collect();
    for (key, &label) in keys.iter().zip(&partition.labels) {
        let s = &mut out[label as usize];
        s.n_cells += 1;
        s.lon_min = s.lon_min.min(key.lon);
        s.lon_max = s.lon_max.max(key.lon);
        s.lat_min = s.lat_min.min(key.lat);
        s.lat_max = s.lat_max.max(key.lat);
        s.centroid_lon += key.lon;
        s.centroid_lat += key.lat;
    }
    for s in &mut out {
        if s.n_cells > 0 {
            s.centroid_lon /= s.n_cells as f64;
            s.centroid_lat /= s.n_cells as f64;
        }
    }
    out
}
