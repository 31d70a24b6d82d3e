//! Run configuration, read from a JSON file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::error::{RegimeError, RegimeResult};
use crate::normalize::{DegeneratePolicy, MissingPolicy};
use crate::partition::InvalidKPolicy;

/// Above this many cells complete linkage becomes impractical.
pub const PRACTICAL_CELL_LIMIT: usize = 15_000;

fn default_cluster_counts() -> Vec<usize> {
    (2..=12).collect()
}

fn default_max_cells() -> usize {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding one sub-directory of rasters per variable.
    pub input_dir: PathBuf,
    /// Variable names; order decides the column blocks.
    pub variables: Vec<String>,
    pub bbox: BoundingBox,
    /// Strictly ascending cluster counts to extract, each at least 2.
    #[serde(default = "default_cluster_counts")]
    pub cluster_counts: Vec<usize>,
    #[serde(default)]
    pub missing_policy: MissingPolicy,
    #[serde(default)]
    pub degenerate_policy: DegeneratePolicy,
    #[serde(default)]
    pub invalid_k_policy: InvalidKPolicy,
    /// Hard ceiling on clustered cells.
    #[serde(default = "default_max_cells")]
    pub max_cells: usize,
}

impl PipelineConfig {
    pub fn new(input_dir: impl Into<PathBuf>, variables: Vec<String>, bbox: BoundingBox) -> Self {
        Self {
            input_dir: input_dir.into(),
            variables,
            bbox,
            cluster_counts: default_cluster_counts(),
            missing_policy: MissingPolicy::default(),
            degenerate_policy: DegeneratePolicy::default(),
            invalid_k_policy: InvalidKPolicy::default(),
            max_cells: default_max_cells(),
        }
    }

    /// Read and validate a JSON config. A relative `input_dir` is resolved
    /// against the config file's directory.
    pub fn from_file(path: &Path) -> RegimeResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| RegimeError::io(path, e))?;
        let mut cfg: Self = serde_json::from_str(&text).map_err(|e| RegimeError::json(path, e))?;
        if cfg.input_dir.is_relative() {
            if let Some(parent) = path.parent() {
                cfg.input_dir = parent.join(&cfg.input_dir);
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> RegimeResult<()> {
        if self.variables.is_empty() {
            return Err(RegimeError::InvalidConfig("no variables configured".into()));
        }
        let mut seen = HashSet::new();
        for v in &self.variables {
            if v.trim().is_empty() {
                return Err(RegimeError::InvalidConfig("empty variable name".into()));
            }
            if !seen.insert(v.as_str()) {
                return Err(RegimeError::InvalidConfig(format!("variable '{v}' listed twice")));
            }
        }
        self.bbox.validate()?;
        if self.cluster_counts.is_empty() {
            return Err(RegimeError::InvalidConfig("no cluster counts requested".into()));
        }
        if let Some(&k) = self.cluster_counts.iter().find(|&&k| k < 2) {
            return Err(RegimeError::InvalidConfig(format!("cluster count {k} is below 2")));
        }
        if self.cluster_counts.windows(2).any(|w| w[0] >= w[1]) {
            return Err(RegimeError::InvalidConfig(format!(
                "cluster counts must be strictly ascending: {:?}",
                self.cluster_counts
            )));
        }
        if self.max_cells == 0 {
            return Err(RegimeError::InvalidConfig("max_cells must be positive".into()));
        }
        Ok(())
    }
}
