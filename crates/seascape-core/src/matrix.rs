//! Feature matrix: one row per grid cell, one column per variable × date.
//!
//! Columns are stored contiguously (column-major) because every stage up to
//! normalization works column by column; [`FeatureMatrix::records`] produces
//! the row-major view the distance engine needs.
//!
//! Row order is the flattened grid order (latitude index major, longitude
//! index minor) restricted to the bounding box. It is fixed once by
//! [`FeatureMatrixBuilder::new`] and never recomputed, so every variable
//! group is filtered with the same row selection.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::bbox::BoundingBox;
use crate::error::{Axis, RegimeError, RegimeResult};
use crate::raster::{RasterLayer, VariableCatalog, VariableGroup};

/// A grid cell, identified by its coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellKey {
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone)]
pub struct FeatureColumn {
    /// `<variable>_<YYYY-MM-DD>`.
    pub label: String,
    /// One value per matrix row. `NaN` = missing.
    pub values: Vec<f64>,
}

impl FeatureColumn {
    pub fn n_valid(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }
}

#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    keys: Vec<CellKey>,
    columns: Vec<FeatureColumn>,
}

impl FeatureMatrix {
    /// Build from parts. Every column must have one value per key.
    pub fn from_columns(keys: Vec<CellKey>, columns: Vec<FeatureColumn>) -> RegimeResult<Self> {
        let mut seen = HashSet::new();
        for col in &columns {
            if col.values.len() != keys.len() {
                return Err(RegimeError::InvalidConfig(format!(
                    "column '{}' has {} values for {} rows",
                    col.label,
                    col.values.len(),
                    keys.len()
                )));
            }
            if !seen.insert(col.label.as_str()) {
                return Err(RegimeError::DuplicateColumn { column: col.label.clone() });
            }
        }
        Ok(Self { keys, columns })
    }

    pub fn n_rows(&self) -> usize {
        self.keys.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn keys(&self) -> &[CellKey] {
        &self.keys
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn column(&self, label: &str) -> Option<&FeatureColumn> {
        self.columns.iter().find(|c| c.label == label)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.label.as_str()).collect()
    }

    pub fn row(&self, r: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c.values[r]).collect()
    }

    /// True if row `r` holds no missing value.
    pub fn row_is_complete(&self, r: usize) -> bool {
        self.columns.iter().all(|c| !c.values[r].is_nan())
    }

    /// True if every feature in row `r` is missing.
    pub fn row_is_empty(&self, r: usize) -> bool {
        self.columns.iter().all(|c| c.values[r].is_nan())
    }

    /// Keep the rows where `keep[r]` is true, preserving order.
    pub fn retain_rows(self, keep: &[bool]) -> Self {
        debug_assert_eq!(keep.len(), self.keys.len());
        let keys = self
            .keys
            .into_iter()
            .zip(keep)
            .filter_map(|(k, &m)| m.then_some(k))
            .collect();
        let columns = self
            .columns
            .into_iter()
            .map(|c| FeatureColumn {
                label: c.label,
                values: c.values.into_iter().zip(keep).filter_map(|(v, &m)| m.then_some(v)).collect(),
            })
            .collect();
        Self { keys, columns }
    }

    pub(crate) fn into_parts(self) -> (Vec<CellKey>, Vec<FeatureColumn>) {
        (self.keys, self.columns)
    }

    /// Row-major copy for the distance engine.
    pub fn records(&self) -> CellRecords {
        let dims = self.columns.len();
        let mut data = Vec::with_capacity(self.keys.len() * dims);
        for r in 0..self.keys.len() {
            data.extend(self.columns.iter().map(|c| c.values[r]));
        }
        CellRecords {
            keys: self.keys.clone(),
            dims,
            data,
        }
    }
}

/// Row-major, normalized cell vectors ready for distance computation.
#[derive(Debug, Clone)]
pub struct CellRecords {
    pub keys: Vec<CellKey>,
    pub dims: usize,
    data: Vec<f64>,
}

impl CellRecords {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[inline]
    pub fn record(&self, i: usize) -> &[f64] {
        &self.data[i * self.dims..(i + 1) * self.dims]
    }

    pub fn has_missing(&self) -> bool {
        self.data.iter().any(|v| v.is_nan())
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Incrementally appends variable groups onto one fixed row selection.
///
/// Layers can be dropped as soon as they are appended, so peak memory is
/// the matrix plus one group rather than every decoded raster at once.
pub struct FeatureMatrixBuilder {
    lon: Vec<f64>,
    lat: Vec<f64>,
    /// Flattened grid indices (`lat_idx * n_lon + lon_idx`) inside the bbox.
    selection: Vec<usize>,
    keys: Vec<CellKey>,
    columns: Vec<FeatureColumn>,
    labels: HashSet<String>,
}

impl FeatureMatrixBuilder {
    /// Fix the grid and row selection. Rows are the lon × lat Cartesian
    /// product in flattened order, keeping cells strictly inside `bbox`.
    pub fn new(lon: &[f64], lat: &[f64], bbox: &BoundingBox) -> Self {
        let mut selection = Vec::new();
        let mut keys = Vec::new();
        for (i, &la) in lat.iter().enumerate() {
            for (j, &lo) in lon.iter().enumerate() {
                if bbox.contains(lo, la) {
                    selection.push(i * lon.len() + j);
                    keys.push(CellKey { lon: lo, lat: la });
                }
            }
        }
        debug!(
            n_grid = lon.len() * lat.len(),
            n_selected = selection.len(),
            "Bounding-box row selection"
        );
        Self {
            lon: lon.to_vec(),
            lat: lat.to_vec(),
            selection,
            keys,
            columns: Vec::new(),
            labels: HashSet::new(),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.keys.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    fn check_grid(&self, layer: &RasterLayer) -> RegimeResult<()> {
        let axis = if layer.lon != self.lon {
            Axis::Lon
        } else if layer.lat != self.lat {
            Axis::Lat
        } else {
            return Ok(());
        };
        Err(RegimeError::CoordinateMismatch {
            variable: layer.variable.clone(),
            file: layer.source.clone(),
            axis,
        })
    }

    /// Append one layer as one column.
    pub fn append_layer(&mut self, layer: &RasterLayer) -> RegimeResult<()> {
        self.check_grid(layer)?;
        let label = layer.column_label();
        if !self.labels.insert(label.clone()) {
            return Err(RegimeError::DuplicateColumn { column: label });
        }
        let values = self.selection.iter().map(|&idx| layer.values[idx] as f64).collect();
        self.columns.push(FeatureColumn { label, values });
        Ok(())
    }

    /// Append every layer of `group`, in date order.
    pub fn append_group(&mut self, group: &VariableGroup) -> RegimeResult<()> {
        for layer in group.layers() {
            self.append_layer(layer)?;
        }
        debug!(variable = %group.variable, n_cols = self.columns.len(), "Appended variable group");
        Ok(())
    }

    pub fn build(self) -> RegimeResult<FeatureMatrix> {
        if self.keys.is_empty() {
            return Err(RegimeError::EmptyMatrix { stage: "bounding-box selection" });
        }
        if self.columns.is_empty() {
            return Err(RegimeError::EmptyMatrix { stage: "assembly (no feature columns)" });
        }
        Ok(FeatureMatrix {
            keys: self.keys,
            columns: self.columns,
        })
    }
}

/// Assemble the feature matrix from every group in `catalog`.
///
/// The first group's grid defines the row selection; each later group must
/// sit on the identical grid. Groups are consumed and dropped one by one.
pub fn assemble(catalog: VariableCatalog, bbox: &BoundingBox) -> RegimeResult<FeatureMatrix> {
    let mut groups = catalog.into_groups().into_iter();
    let Some(first) = groups.next() else {
        return Err(RegimeError::EmptyMatrix { stage: "assembly (no variables)" });
    };
    let mut builder = FeatureMatrixBuilder::new(&first.lon, &first.lat, bbox);
    builder.append_group(&first)?;
    drop(first);
    for group in groups {
        builder.append_group(&group)?;
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn layer(var: &str, day: u32, lon: &[f64], lat: &[f64], f: impl Fn(usize) -> f32) -> RasterLayer {
        let n = lon.len() * lat.len();
        RasterLayer::new(
            var,
            NaiveDate::from_ymd_opt(2015, 1, day).unwrap(),
            lon.to_vec(),
            lat.to_vec(),
            (0..n).map(f).collect(),
            format!("{var}_{day}.json"),
        )
        .unwrap()
    }

    const LON: [f64; 5] = [150.0, 150.5, 151.0, 151.5, 152.0];
    const LAT: [f64; 4] = [-30.0, -30.5, -31.0, -31.5];

    #[test]
    fn row_count_is_grid_product_restricted_by_strict_bbox() {
        // Open box around the whole grid keeps all 20 cells.
        let all = BoundingBox::new(149.0, 153.0, -32.0, -29.0);
        assert_eq!(FeatureMatrixBuilder::new(&LON, &LAT, &all).n_rows(), 20);

        // Bounds equal to the outer coordinates drop the outer ring.
        let exact = BoundingBox::new(150.0, 152.0, -31.5, -30.0);
        let b = FeatureMatrixBuilder::new(&LON, &LAT, &exact);
        assert_eq!(b.n_rows(), 3 * 2);
        assert!(b.keys.iter().all(|k| k.lon != 150.0 && k.lon != 152.0));
        assert!(b.keys.iter().all(|k| k.lat != -30.0 && k.lat != -31.5));
    }

    #[test]
    fn rows_follow_flattened_grid_order() {
        let bbox = BoundingBox::new(149.0, 153.0, -32.0, -29.0);
        let mut b = FeatureMatrixBuilder::new(&LON, &LAT, &bbox);
        b.append_layer(&layer("sst", 1, &LON, &LAT, |i| i as f32)).unwrap();
        let m = b.build().unwrap();
        assert_eq!(m.keys()[0], CellKey { lon: 150.0, lat: -30.0 });
        assert_eq!(m.keys()[1], CellKey { lon: 150.5, lat: -30.0 });
        assert_eq!(m.keys()[5], CellKey { lon: 150.0, lat: -30.5 });
        // Value at flattened index i is i.
        assert_eq!(m.columns()[0].values[7], 7.0);
    }

    #[test]
    fn selection_is_shared_by_every_group() {
        let bbox = BoundingBox::new(150.2, 151.8, -31.2, -30.2);
        let mut b = FeatureMatrixBuilder::new(&LON, &LAT, &bbox);
        let sst = VariableGroup::new(
            "sst",
            vec![layer("sst", 2, &LON, &LAT, |i| i as f32), layer("sst", 1, &LON, &LAT, |i| -(i as f32))],
        )
        .unwrap();
        let chl = VariableGroup::new("chlor_a", vec![layer("chlor_a", 1, &LON, &LAT, |i| 100.0 + i as f32)]).unwrap();
        b.append_group(&sst).unwrap();
        b.append_group(&chl).unwrap();
        let m = b.build().unwrap();

        assert_eq!(m.labels(), vec!["sst_2015-01-01", "sst_2015-01-02", "chlor_a_2015-01-01"]);
        assert_eq!(m.n_rows(), 3 * 2);
        for r in 0..m.n_rows() {
            let row = m.row(r);
            assert_eq!(row[0], -row[1]);
            assert_eq!(row[2], 100.0 + row[1]);
        }
    }

    #[test]
    fn group_on_a_different_grid_is_rejected() {
        let bbox = BoundingBox::new(149.0, 153.0, -32.0, -29.0);
        let mut b = FeatureMatrixBuilder::new(&LON, &LAT, &bbox);
        let mut lat = LAT;
        lat[3] = -31.25;
        let err = b.append_layer(&layer("par", 1, &LON, &lat, |_| 1.0)).unwrap_err();
        assert!(matches!(err, RegimeError::CoordinateMismatch { axis: Axis::Lat, .. }));
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let bbox = BoundingBox::new(149.0, 153.0, -32.0, -29.0);
        let mut b = FeatureMatrixBuilder::new(&LON, &LAT, &bbox);
        b.append_layer(&layer("sst", 1, &LON, &LAT, |_| 1.0)).unwrap();
        let err = b.append_layer(&layer("sst", 1, &LON, &LAT, |_| 2.0)).unwrap_err();
        assert!(matches!(err, RegimeError::DuplicateColumn { .. }));
    }

    #[test]
    fn empty_selection_fails_to_build() {
        let bbox = BoundingBox::new(0.0, 1.0, 0.0, 1.0);
        let mut b = FeatureMatrixBuilder::new(&LON, &LAT, &bbox);
        b.append_layer(&layer("sst", 1, &LON, &LAT, |_| 1.0)).unwrap();
        assert!(matches!(b.build().unwrap_err(), RegimeError::EmptyMatrix { .. }));
    }

    #[test]
    fn retain_rows_keeps_keys_and_values_aligned() {
        let bbox = BoundingBox::new(149.0, 153.0, -32.0, -29.0);
        let mut b = FeatureMatrixBuilder::new(&LON, &LAT, &bbox);
        b.append_layer(&layer("sst", 1, &LON, &LAT, |i| i as f32)).unwrap();
        let m = b.build().unwrap();
        let keep: Vec<bool> = (0..20).map(|i| i % 2 == 0).collect();
        let m = m.retain_rows(&keep);
        assert_eq!(m.n_rows(), 10);
        assert_eq!(m.columns()[0].values[3], 6.0);
        assert_eq!(m.keys()[3], CellKey { lon: 150.5, lat: -30.5 });
    }

    #[test]
    fn records_are_row_major() {
        let keys = vec![CellKey { lon: 0.0, lat: 0.0 }, CellKey { lon: 1.0, lat: 0.0 }];
        let m = FeatureMatrix::from_columns(
            keys,
            vec![
                FeatureColumn { label: "a".into(), values: vec![1.0, 2.0] },
                FeatureColumn { label: "b".into(), values: vec![3.0, 4.0] },
            ],
        )
        .unwrap();
        let rec = m.records();
        assert_eq!(rec.record(0), &[1.0, 3.0]);
        assert_eq!(rec.record(1), &[2.0, 4.0]);
    }
}
