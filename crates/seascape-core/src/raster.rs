//! Decoded raster layers and their per-variable groupings.
//!
//! A [`RasterLayer`] is one variable at one coverage date on a regular
//! lon/lat grid, stored row-major: latitude index major, longitude index
//! minor. Missing observations are `NaN`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::{Axis, RegimeError, RegimeResult};

/// Global attribute carrying the start of a layer's coverage period.
pub const COVERAGE_START_ATTR: &str = "time_coverage_start";

/// One decoded grid snapshot.
#[derive(Debug, Clone)]
pub struct RasterLayer {
    pub variable: String,
    pub date: NaiveDate,
    pub lon: Vec<f64>,
    pub lat: Vec<f64>,
    /// Row-major values, `lat.len() * lon.len()` long. `NaN` = missing.
    pub values: Vec<f32>,
    /// File the layer was decoded from, used in diagnostics.
    pub source: PathBuf,
}

impl RasterLayer {
    /// Build a layer, checking that `values` covers the lon × lat grid.
    pub fn new(
        variable: impl Into<String>,
        date: NaiveDate,
        lon: Vec<f64>,
        lat: Vec<f64>,
        values: Vec<f32>,
        source: impl Into<PathBuf>,
    ) -> RegimeResult<Self> {
        let source = source.into();
        if values.len() != lon.len() * lat.len() {
            return Err(RegimeError::ShapeMismatch {
                file: source,
                n_values: values.len(),
                n_lat: lat.len(),
                n_lon: lon.len(),
            });
        }
        Ok(Self {
            variable: variable.into(),
            date,
            lon,
            lat,
            values,
            source,
        })
    }

    #[inline]
    pub fn get(&self, lat_idx: usize, lon_idx: usize) -> f32 {
        self.values[lat_idx * self.lon.len() + lon_idx]
    }

    /// Feature column label: `<variable>_<YYYY-MM-DD>`.
    pub fn column_label(&self) -> String {
        format!("{}_{}", self.variable, self.date.format("%Y-%m-%d"))
    }

    pub fn n_missing(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    pub fn missing_fraction(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.n_missing() as f64 / self.values.len() as f64
    }
}

/// Parse a coverage-start attribute into a calendar date.
///
/// Accepts RFC 3339 (`2015-01-01T00:00:00Z`, `...+10:00`), naive ISO
/// datetimes with an optional fraction and trailing `Z`, space-separated
/// datetimes, and bare `YYYY-MM-DD`. Time of day is discarded.
pub fn parse_coverage_date(value: &str, file: &Path) -> RegimeResult<NaiveDate> {
    let s = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    let naive = s.trim_end_matches('Z');
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Ok(dt.date());
        }
    }
    NaiveDate::parse_from_str(naive, "%Y-%m-%d").map_err(|_| RegimeError::InvalidTimestamp {
        value: value.to_string(),
        file: file.to_path_buf(),
    })
}

/// Check that every layer shares the first layer's coordinate vectors.
///
/// Equality is exact: a grid shifted by a rounding error is still a
/// different grid, and silently merging it would misalign cells.
pub fn validate_coordinates(variable: &str, layers: &[RasterLayer]) -> RegimeResult<()> {
    let Some(reference) = layers.first() else {
        return Ok(());
    };
    for layer in &layers[1..] {
        if layer.lon != reference.lon {
            return Err(RegimeError::CoordinateMismatch {
                variable: variable.to_string(),
                file: layer.source.clone(),
                axis: Axis::Lon,
            });
        }
        if layer.lat != reference.lat {
            return Err(RegimeError::CoordinateMismatch {
                variable: variable.to_string(),
                file: layer.source.clone(),
                axis: Axis::Lat,
            });
        }
    }
    Ok(())
}

// ── Variable group ────────────────────────────────────────────────────────────

/// All layers of one variable, sorted by date, on one shared grid.
#[derive(Debug, Clone)]
pub struct VariableGroup {
    pub variable: String,
    pub lon: Vec<f64>,
    pub lat: Vec<f64>,
    layers: Vec<RasterLayer>,
}

impl VariableGroup {
    /// Validate and sort `layers` into a group.
    ///
    /// Fails on an empty layer set, a coordinate mismatch, or two layers
    /// with the same date (their column labels would collide).
    pub fn new(variable: impl Into<String>, mut layers: Vec<RasterLayer>) -> RegimeResult<Self> {
        let variable = variable.into();
        if layers.is_empty() {
            return Err(RegimeError::EmptyGroup { variable });
        }
        validate_coordinates(&variable, &layers)?;

        // Stable sort keeps file order for the duplicate diagnostic below.
        layers.sort_by_key(|l| l.date);
        for pair in layers.windows(2) {
            if pair[0].date == pair[1].date {
                return Err(RegimeError::DuplicateColumn {
                    column: pair[1].column_label(),
                });
            }
        }

        let lon = layers[0].lon.clone();
        let lat = layers[0].lat.clone();
        Ok(Self {
            variable,
            lon,
            lat,
            layers,
        })
    }

    pub fn layers(&self) -> &[RasterLayer] {
        &self.layers
    }

    pub fn into_layers(self) -> Vec<RasterLayer> {
        self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// First and last coverage dates.
    pub fn date_range(&self) -> (NaiveDate, NaiveDate) {
        // `new` guarantees at least one layer.
        (self.layers[0].date, self.layers[self.layers.len() - 1].date)
    }

    pub fn n_cells(&self) -> usize {
        self.lon.len() * self.lat.len()
    }
}

// ── Catalog ───────────────────────────────────────────────────────────────────

/// Variable name → group, in insertion order.
///
/// Insertion order is the configured variable order and decides the order
/// of column blocks in the feature matrix.
#[derive(Debug, Clone, Default)]
pub struct VariableCatalog {
    groups: Vec<VariableGroup>,
}

/// Per-variable summary for reports and the inspection tool.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub variable: String,
    pub n_layers: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub n_lon: usize,
    pub n_lat: usize,
    pub missing_fraction: f64,
}

impl VariableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group. A second group with the same variable name is rejected.
    pub fn insert(&mut self, group: VariableGroup) -> RegimeResult<()> {
        if self.get(&group.variable).is_some() {
            return Err(RegimeError::InvalidConfig(format!(
                "variable '{}' loaded twice",
                group.variable
            )));
        }
        self.groups.push(group);
        Ok(())
    }

    pub fn get(&self, variable: &str) -> Option<&VariableGroup> {
        self.groups.iter().find(|g| g.variable == variable)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableGroup> {
        self.groups.iter()
    }

    pub fn variables(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.variable.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn into_groups(self) -> Vec<VariableGroup> {
        self.groups
    }

    /// First group whose coordinate vectors differ from the first group's,
    /// with the axis that differs. Assembly rejects such a catalog.
    pub fn grid_mismatch(&self) -> Option<(&str, Axis)> {
        let reference = self.groups.first()?;
        self.groups[1..].iter().find_map(|g| {
            if g.lon != reference.lon {
                Some((g.variable.as_str(), Axis::Lon))
            } else if g.lat != reference.lat {
                Some((g.variable.as_str(), Axis::Lat))
            } else {
                None
            }
        })
    }

    pub fn summaries(&self) -> Vec<GroupSummary> {
        self.groups
            .iter()
            .map(|g| {
                let (first_date, last_date) = g.date_range();
                let total: usize = g.layers().iter().map(|l| l.values.len()).sum();
                let missing: usize = g.layers().iter().map(RasterLayer::n_missing).sum();
                GroupSummary {
                    variable: g.variable.clone(),
                    n_layers: g.len(),
                    first_date,
                    last_date,
                    n_lon: g.lon.len(),
                    n_lat: g.lat.len(),
                    missing_fraction: if total == 0 { 0.0 } else { missing as f64 / total as f64 },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn layer(day: u32, lon: Vec<f64>, lat: Vec<f64>) -> RasterLayer {
        let n = lon.len() * lat.len();
        RasterLayer::new("sst", date(2015, 1, day), lon, lat, vec![1.0; n], format!("sst_{day}.json"))
            .unwrap()
    }

    #[test]
    fn new_rejects_wrong_value_count() {
        let err = RasterLayer::new("sst", date(2015, 1, 1), vec![0.0, 1.0], vec![0.0], vec![1.0; 3], "a.json")
            .unwrap_err();
        assert!(matches!(err, RegimeError::ShapeMismatch { n_values: 3, n_lat: 1, n_lon: 2, .. }));
    }

    #[test]
    fn get_is_lat_major() {
        let l = RasterLayer::new(
            "sst",
            date(2015, 1, 1),
            vec![10.0, 11.0, 12.0],
            vec![-1.0, -2.0],
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            "a.json",
        )
        .unwrap();
        assert_eq!(l.get(1, 0), 3.0);
        assert_eq!(l.get(0, 2), 2.0);
    }

    #[test]
    fn column_label_uses_day_precision() {
        let l = layer(7, vec![0.0], vec![0.0]);
        assert_eq!(l.column_label(), "sst_2015-01-07");
    }

    #[test]
    fn parse_coverage_date_accepts_common_forms() {
        let f = Path::new("x.nc");
        assert_eq!(parse_coverage_date("2015-03-01T00:00:00Z", f).unwrap(), date(2015, 3, 1));
        assert_eq!(parse_coverage_date("2015-03-01T23:59:59.500Z", f).unwrap(), date(2015, 3, 1));
        assert_eq!(parse_coverage_date("2015-03-01T12:00:00+10:00", f).unwrap(), date(2015, 3, 1));
        assert_eq!(parse_coverage_date("2015-03-01 06:00:00", f).unwrap(), date(2015, 3, 1));
        assert_eq!(parse_coverage_date("2015-03-01", f).unwrap(), date(2015, 3, 1));
    }

    #[test]
    fn parse_coverage_date_rejects_garbage() {
        let err = parse_coverage_date("March 2015", Path::new("x.nc")).unwrap_err();
        assert!(matches!(err, RegimeError::InvalidTimestamp { .. }));
    }

    #[test]
    fn identical_grids_validate() {
        let layers = vec![
            layer(1, vec![0.0, 1.0], vec![5.0, 6.0]),
            layer(2, vec![0.0, 1.0], vec![5.0, 6.0]),
        ];
        assert!(validate_coordinates("sst", &layers).is_ok());
    }

    #[test]
    fn one_mismatched_layer_fails_validation() {
        let layers = vec![
            layer(1, vec![0.0, 1.0], vec![5.0, 6.0]),
            layer(2, vec![0.0, 1.0], vec![5.0, 6.0]),
            layer(3, vec![0.0, 1.0], vec![5.0, 6.000001]),
        ];
        match validate_coordinates("sst", &layers).unwrap_err() {
            RegimeError::CoordinateMismatch { variable, file, axis } => {
                assert_eq!(variable, "sst");
                assert_eq!(file, PathBuf::from("sst_3.json"));
                assert_eq!(axis, Axis::Lat);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn group_sorts_layers_by_date() {
        let g = VariableGroup::new(
            "sst",
            vec![
                layer(3, vec![0.0], vec![0.0]),
                layer(1, vec![0.0], vec![0.0]),
                layer(2, vec![0.0], vec![0.0]),
            ],
        )
        .unwrap();
        let days: Vec<u32> = g.layers().iter().map(|l| chrono::Datelike::day(&l.date)).collect();
        assert_eq!(days, vec![1, 2, 3]);
        assert_eq!(g.date_range(), (date(2015, 1, 1), date(2015, 1, 3)));
    }

    #[test]
    fn group_rejects_duplicate_dates() {
        let err = VariableGroup::new(
            "sst",
            vec![layer(1, vec![0.0], vec![0.0]), layer(1, vec![0.0], vec![0.0])],
        )
        .unwrap_err();
        assert!(matches!(err, RegimeError::DuplicateColumn { ref column } if column == "sst_2015-01-01"));
    }

    #[test]
    fn group_rejects_empty_layer_set() {
        let err = VariableGroup::new("sst", Vec::new()).unwrap_err();
        assert!(matches!(err, RegimeError::EmptyGroup { .. }));
    }

    #[test]
    fn catalog_keeps_insertion_order_and_rejects_duplicates() {
        let mut cat = VariableCatalog::new();
        let mk = |name: &str| {
            let mut l = layer(1, vec![0.0], vec![0.0]);
            l.variable = name.to_string();
            VariableGroup::new(name, vec![l]).unwrap()
        };
        cat.insert(mk("sst")).unwrap();
        cat.insert(mk("chlor_a")).unwrap();
        assert_eq!(cat.variables(), vec!["sst", "chlor_a"]);
        assert!(cat.insert(mk("sst")).is_err());
        assert!(cat.get("chlor_a").is_some());
        assert!(cat.get("par").is_none());
    }

    #[test]
    fn grid_mismatch_compares_coordinates_not_shape() {
        let grouped = |name: &str, lat: Vec<f64>| {
            let mut l = layer(1, vec![0.0, 1.0], lat);
            l.variable = name.to_string();
            VariableGroup::new(name, vec![l]).unwrap()
        };
        let mut cat = VariableCatalog::new();
        cat.insert(grouped("sst", vec![5.0, 6.0])).unwrap();
        cat.insert(grouped("chlor_a", vec![5.0, 6.0])).unwrap();
        assert_eq!(cat.grid_mismatch(), None);

        // Same 2x2 shape, shifted latitudes.
        cat.insert(grouped("par", vec![5.5, 6.5])).unwrap();
        assert_eq!(cat.grid_mismatch(), Some(("par", Axis::Lat)));
    }
}
