//! Error taxonomy for the regionalization pipeline.
//!
//! Every variant is fatal for the run that raised it; nothing is retried.
//! Messages name the file, variable, column or row responsible so the input
//! or configuration can be fixed and the run repeated.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for pipeline operations.
pub type RegimeResult<T> = Result<T, RegimeError>;

/// Grid axis named in coordinate diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Lon,
    Lat,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Lon => write!(f, "longitude"),
            Axis::Lat => write!(f, "latitude"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RegimeError {
    /// Two layers that must share a grid have different coordinate vectors.
    #[error("coordinate mismatch for variable '{variable}': {axis} vector of {file} differs from the reference grid")]
    CoordinateMismatch {
        variable: String,
        file: PathBuf,
        axis: Axis,
    },

    #[error("variable '{variable}' not found in {file}")]
    MissingVariable { variable: String, file: PathBuf },

    #[error("attribute '{attribute}' not found in {file}")]
    MissingAttribute { attribute: String, file: PathBuf },

    #[error("cannot parse coverage start '{value}' in {file}")]
    InvalidTimestamp { value: String, file: PathBuf },

    /// Value array length does not equal `lat.len() * lon.len()`.
    #[error("shape mismatch in {file}: {n_values} values for a {n_lat}x{n_lon} grid")]
    ShapeMismatch {
        file: PathBuf,
        n_values: usize,
        n_lat: usize,
        n_lon: usize,
    },

    #[error("no raster layers found for variable '{variable}'")]
    EmptyGroup { variable: String },

    #[error("duplicate feature column '{column}'")]
    DuplicateColumn { column: String },

    #[error("feature matrix is empty after {stage}")]
    EmptyMatrix { stage: &'static str },

    /// Column with fewer than two valid values or zero spread.
    #[error("column '{column}' is degenerate (sd = {sd}, {valid} valid values)")]
    DegenerateColumn { column: String, sd: f64, valid: usize },

    #[error("invalid cluster count k = {k} for {n_cells} cells (need 1 <= k <= n)")]
    InvalidK { k: usize, n_cells: usize },

    #[error("none of the requested cluster counts {requested:?} is valid for {n_cells} cells")]
    NoPartitions { requested: Vec<usize>, n_cells: usize },

    #[error("{n_cells} cells exceed the configured limit of {max_cells}; narrow the bounding box")]
    TooManyCells { n_cells: usize, max_cells: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[cfg(feature = "netcdf")]
    #[error("NetCDF error in {path}: {source}")]
    Netcdf {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },
}

impl RegimeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RegimeError::Io { path: path.into(), source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        RegimeError::Json { path: path.into(), source }
    }
}
