//! Grid loader: decodes raster files into layers and assembles variable groups.
//!
//! Decoding sits behind [`RasterReader`]. The JSON backend is always
//! available; the NetCDF backend is compiled with the `netcdf` feature.
//!
//! Input layout: `<input_dir>/<variable>/<any name>.<ext>`, one file per
//! coverage period. Files are visited in sorted name order so loading is
//! deterministic regardless of directory iteration order.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RegimeError, RegimeResult};
use crate::raster::{parse_coverage_date, RasterLayer, VariableCatalog, VariableGroup, COVERAGE_START_ATTR};

/// Decodes one raster file into a [`RasterLayer`] for a named variable.
pub trait RasterReader {
    /// Lower-case file extensions (without dot) this reader understands.
    fn extensions(&self) -> &[&'static str];

    fn read_layer(&self, path: &Path, variable: &str) -> RegimeResult<RasterLayer>;

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions().iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

// ── JSON backend ──────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum GridValues {
    /// `[[row0...], [row1...]]`, one inner array per latitude.
    Nested(Vec<Vec<Option<f64>>>),
    Flat(Vec<Option<f64>>),
}

#[derive(Serialize, Deserialize)]
struct JsonVariable {
    data: GridValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fill_value: Option<f64>,
}

#[derive(Serialize, Deserialize)]
struct JsonRaster {
    lon: Vec<f64>,
    lat: Vec<f64>,
    #[serde(default)]
    attributes: HashMap<String, serde_json::Value>,
    variables: HashMap<String, JsonVariable>,
}

/// Reads rasters serialised as JSON documents:
///
/// ```json
/// { "lon": [...], "lat": [...],
///   "attributes": { "time_coverage_start": "2015-01-01T00:00:00Z" },
///   "variables": { "sst": { "data": [[...], ...], "fill_value": -999.0 } } }
/// ```
///
/// `null` entries and entries equal to `fill_value` are missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRasterReader;

impl JsonRasterReader {
    /// Serialise `layer` in the format [`JsonRasterReader`] reads.
    /// Missing values are written as `null`.
    pub fn write_layer(layer: &RasterLayer, path: &Path) -> RegimeResult<()> {
        let data = layer
            .values
            .iter()
            .map(|&v| if v.is_nan() { None } else { Some(v as f64) })
            .collect();
        let mut attributes = HashMap::new();
        attributes.insert(
            COVERAGE_START_ATTR.to_string(),
            serde_json::Value::String(format!("{}T00:00:00Z", layer.date.format("%Y-%m-%d"))),
        );
        let mut variables = HashMap::new();
        variables.insert(
            layer.variable.clone(),
            JsonVariable { data: GridValues::Flat(data), fill_value: None },
        );
        let doc = JsonRaster {
            lon: layer.lon.clone(),
            lat: layer.lat.clone(),
            attributes,
            variables,
        };
        let json = serde_json::to_string(&doc).map_err(|e| RegimeError::json(path, e))?;
        fs::write(path, json).map_err(|e| RegimeError::io(path, e))
    }
}

impl RasterReader for JsonRasterReader {
    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn read_layer(&self, path: &Path, variable: &str) -> RegimeResult<RasterLayer> {
        let text = fs::read_to_string(path).map_err(|e| RegimeError::io(path, e))?;
        let mut doc: JsonRaster = serde_json::from_str(&text).map_err(|e| RegimeError::json(path, e))?;

        let var = doc.variables.remove(variable).ok_or_else(|| RegimeError::MissingVariable {
            variable: variable.to_string(),
            file: path.to_path_buf(),
        })?;

        let start = doc.attributes.get(COVERAGE_START_ATTR).ok_or_else(|| {
            RegimeError::MissingAttribute {
                attribute: COVERAGE_START_ATTR.to_string(),
                file: path.to_path_buf(),
            }
        })?;
        let date = match start {
            serde_json::Value::String(s) => parse_coverage_date(s, path)?,
            other => {
                return Err(RegimeError::InvalidTimestamp {
                    value: other.to_string(),
                    file: path.to_path_buf(),
                })
            }
        };

        let raw: Vec<Option<f64>> = match var.data {
            GridValues::Flat(v) => v,
            GridValues::Nested(rows) => {
                if rows.iter().any(|r| r.len() != doc.lon.len()) {
                    return Err(RegimeError::ShapeMismatch {
                        file: path.to_path_buf(),
                        n_values: rows.iter().map(Vec::len).sum(),
                        n_lat: doc.lat.len(),
                        n_lon: doc.lon.len(),
                    });
                }
                rows.into_iter().flatten().collect()
            }
        };
        let fill = var.fill_value;
        let values = raw
            .into_iter()
            .map(|v| match v {
                Some(x) if Some(x) != fill && x.is_finite() => x as f32,
                _ => f32::NAN,
            })
            .collect();

        RasterLayer::new(variable, date, doc.lon, doc.lat, values, path)
    }
}

// ── NetCDF backend ────────────────────────────────────────────────────────────

/// Reads CF-style NetCDF files: a 2D (optionally with singleton time
/// dimension) data variable, `lon`/`lat` or `longitude`/`latitude`
/// coordinate variables, and a global `time_coverage_start` attribute.
///
/// `scale_factor` and `add_offset` are applied; `_FillValue` becomes missing.
#[cfg(feature = "netcdf")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfRasterReader;

#[cfg(feature = "netcdf")]
impl NetcdfRasterReader {
    fn f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
        if !var.attributes().any(|a| a.name() == name) {
            return None;
        }
        let value = var.attribute_value(name)?.ok()?;
        f64::try_from(value).ok()
    }

    fn coordinate(file: &netcdf::File, names: &[&str], path: &Path) -> RegimeResult<(String, Vec<f64>)> {
        for &name in names {
            if let Some(var) = file.variable(name) {
                let values: Vec<f64> = var.get_values(..).map_err(|source| RegimeError::Netcdf {
                    path: path.to_path_buf(),
                    source,
                })?;
                return Ok((name.to_string(), values));
            }
        }
        Err(RegimeError::MissingVariable {
            variable: names.join("|"),
            file: path.to_path_buf(),
        })
    }
}

#[cfg(feature = "netcdf")]
impl RasterReader for NetcdfRasterReader {
    fn extensions(&self) -> &[&'static str] {
        &["nc", "nc4"]
    }

    fn read_layer(&self, path: &Path, variable: &str) -> RegimeResult<RasterLayer> {
        let nc_err = |source| RegimeError::Netcdf { path: path.to_path_buf(), source };
        let file = netcdf::open(path).map_err(nc_err)?;

        let (lon_name, lon) = Self::coordinate(&file, &["lon", "longitude"], path)?;
        let (_, lat) = Self::coordinate(&file, &["lat", "latitude"], path)?;

        let var = file.variable(variable).ok_or_else(|| RegimeError::MissingVariable {
            variable: variable.to_string(),
            file: path.to_path_buf(),
        })?;
        let raw: Vec<f64> = var.get_values(..).map_err(nc_err)?;
        let scale = Self::f64_attr(&var, "scale_factor").unwrap_or(1.0);
        let offset = Self::f64_attr(&var, "add_offset").unwrap_or(0.0);
        let fill = Self::f64_attr(&var, "_FillValue");

        let unpacked: Vec<f32> = raw
            .iter()
            .map(|&v| {
                if Some(v) == fill || !v.is_finite() {
                    f32::NAN
                } else {
                    (v * scale + offset) as f32
                }
            })
            .collect();

        // Data stored lon-major must be transposed to lat-major.
        let spatial: Vec<String> = var
            .dimensions()
            .iter()
            .filter(|d| d.len() > 1)
            .map(|d| d.name())
            .collect();
        let lon_major = spatial.first().map(|d| *d == lon_name).unwrap_or(false);
        let values = if lon_major && unpacked.len() == lon.len() * lat.len() {
            let mut out = vec![f32::NAN; unpacked.len()];
            for j in 0..lon.len() {
                for i in 0..lat.len() {
                    out[i * lon.len() + j] = unpacked[j * lat.len() + i];
                }
            }
            out
        } else {
            unpacked
        };

        let attr = file.attribute(COVERAGE_START_ATTR).ok_or_else(|| RegimeError::MissingAttribute {
            attribute: COVERAGE_START_ATTR.to_string(),
            file: path.to_path_buf(),
        })?;
        let date = match attr.value().map_err(nc_err)? {
            netcdf::AttributeValue::Str(s) => parse_coverage_date(&s, path)?,
            other => {
                return Err(RegimeError::InvalidTimestamp {
                    value: format!("{other:?}"),
                    file: path.to_path_buf(),
                })
            }
        };

        RasterLayer::new(variable, date, lon, lat, values, path)
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// Picks a backend per file by extension.
pub struct DispatchReader {
    readers: Vec<Box<dyn RasterReader>>,
    extensions: Vec<&'static str>,
}

impl DispatchReader {
    pub fn new(readers: Vec<Box<dyn RasterReader>>) -> Self {
        let extensions = readers.iter().flat_map(|r| r.extensions().iter().copied()).collect();
        Self { readers, extensions }
    }
}

impl Default for DispatchReader {
    /// Every backend compiled into this build.
    fn default() -> Self {
        #[allow(unused_mut)]
        let mut readers: Vec<Box<dyn RasterReader>> = vec![Box::new(JsonRasterReader)];
        #[cfg(feature = "netcdf")]
        readers.push(Box::new(NetcdfRasterReader));
        Self::new(readers)
    }
}

impl RasterReader for DispatchReader {
    fn extensions(&self) -> &[&'static str] {
        &self.extensions
    }

    fn read_layer(&self, path: &Path, variable: &str) -> RegimeResult<RasterLayer> {
        match self.readers.iter().find(|r| r.accepts(path)) {
            Some(reader) => reader.read_layer(path, variable),
            None => Err(RegimeError::InvalidConfig(format!(
                "no raster reader for {}",
                path.display()
            ))),
        }
    }
}

// ── Group loading ─────────────────────────────────────────────────────────────

/// Raster files under `dir` the reader accepts, sorted by file name.
pub fn list_raster_files(reader: &dyn RasterReader, dir: &Path) -> RegimeResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| RegimeError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| RegimeError::io(dir, e))?.path();
        if path.is_file() && reader.accepts(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load every layer of `variable` from `dir` and validate them as a group.
pub fn load_variable_group(
    reader: &dyn RasterReader,
    dir: &Path,
    variable: &str,
) -> RegimeResult<VariableGroup> {
    let files = list_raster_files(reader, dir)?;
    debug!(variable, dir = %dir.display(), n_files = files.len(), "Listing raster files");

    let mut layers = Vec::with_capacity(files.len());
    for file in &files {
        layers.push(reader.read_layer(file, variable)?);
    }
    let group = VariableGroup::new(variable, layers)?;

    let (first, last) = group.date_range();
    info!(
        variable,
        n_layers = group.len(),
        n_lon = group.lon.len(),
        n_lat = group.lat.len(),
        %first,
        %last,
        "Loaded variable group"
    );
    Ok(group)
}

/// Load one group per variable from `<input_dir>/<variable>/`, in order.
pub fn load_catalog(
    reader: &dyn RasterReader,
    input_dir: &Path,
    variables: &[String],
) -> RegimeResult<VariableCatalog> {
    let mut catalog = VariableCatalog::new();
    for variable in variables {
        let group = load_variable_group(reader, &input_dir.join(variable), variable)?;
        catalog.insert(group)?;
    }
    Ok(catalog)
}
