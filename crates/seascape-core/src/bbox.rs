use serde::{Deserialize, Serialize};

use crate::error::{RegimeError, RegimeResult};

/// Spatial extent restricting which grid cells enter the feature matrix.
///
/// Bounds are exclusive: a cell lying exactly on any edge is outside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl BoundingBox {
    pub fn new(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lon_max,
            lat_min,
            lat_max,
        }
    }

    /// Strict containment: `lon_min < lon < lon_max && lat_min < lat < lat_max`.
    #[inline]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.lon_min < lon && lon < self.lon_max && self.lat_min < lat && lat < self.lat_max
    }

    pub fn validate(&self) -> RegimeResult<()> {
        let all = [self.lon_min, self.lon_max, self.lat_min, self.lat_max];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(RegimeError::InvalidConfig(format!("bounding box has non-finite bounds: {self:?}")));
        }
        if self.lon_min >= self.lon_max || self.lat_min >= self.lat_max {
            return Err(RegimeError::InvalidConfig(format!("bounding box is empty or inverted: {self:?}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_are_excluded() {
        let b = BoundingBox::new(140.0, 150.0, -40.0, -30.0);
        assert!(b.contains(145.0, -35.0));
        assert!(!b.contains(140.0, -35.0));
        assert!(!b.contains(150.0, -35.0));
        assert!(!b.contains(145.0, -40.0));
        assert!(!b.contains(145.0, -30.0));
    }

    #[test]
    fn inverted_box_is_invalid() {
        assert!(BoundingBox::new(150.0, 140.0, -40.0, -30.0).validate().is_err());
        assert!(BoundingBox::new(140.0, 150.0, -30.0, -30.0).validate().is_err());
        assert!(BoundingBox::new(f64::NAN, 150.0, -40.0, -30.0).validate().is_err());
        assert!(BoundingBox::new(140.0, 150.0, -40.0, -30.0).validate().is_ok());
    }
}
