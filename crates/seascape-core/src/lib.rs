//! Ocean-regime regionalization: turns stacks of gridded satellite rasters
//! into hierarchical clusterings of ocean cells, cut at several cluster
//! counts.

pub mod bbox;
pub mod config;
pub mod distance;
pub mod error;
pub mod filter;
pub mod linkage;
pub mod loader;
pub mod matrix;
pub mod normalize;
pub mod output;
pub mod partition;
pub mod pipeline;
pub mod raster;

pub use bbox::BoundingBox;
pub use config::{PipelineConfig, PRACTICAL_CELL_LIMIT};
pub use error::{RegimeError, RegimeResult};
pub use linkage::{complete_linkage, Dendrogram, Merge};
pub use loader::{load_catalog, DispatchReader, JsonRasterReader, RasterReader};
pub use matrix::{assemble, CellKey, FeatureMatrix, FeatureMatrixBuilder};
pub use normalize::{DegeneratePolicy, MissingPolicy};
pub use output::TableFormat;
pub use partition::{cut, extract_partitions, InvalidKPolicy, Partition, PartitionTable};
pub use pipeline::{run_on_catalog, run_pipeline, RegimeOutcome, RunReport};
pub use raster::{RasterLayer, VariableCatalog, VariableGroup};
