use crate::types::GeoTransform;
use geo::{Contains, Point, Polygon};

/// Decides which raster pixels carry a usable NDVI value.
///
/// Range estimation, vectorization and statistics all classify pixels through
/// the same filter, so a pixel is either valid everywhere or nowhere.
#[derive(Debug, Clone)]
pub struct PixelFilter {
    nodata: Option<f32>,
    min_valid: Option<f32>,
    field: Option<(Polygon<f64>, GeoTransform)>,
}

impl PixelFilter {
    pub fn new(nodata: Option<f32>, min_valid: Option<f32>) -> Self {
        Self {
            nodata,
            min_valid,
            field: None,
        }
    }

    /// Additionally require the pixel centre to fall inside `field`
    pub fn within_field(mut self, field: Polygon<f64>, transform: GeoTransform) -> Self {
        self.field = Some((field, transform));
        self
    }

    /// Value test only (NaN or infinite, nodata sentinel, floor)
    pub fn is_valid_value(&self, value: f32) -> bool {
        if !value.is_finite() {
            return false;
        }
        if let Some(nodata) = self.nodata {
            if value == nodata {
                return false;
            }
        }
        match self.min_valid {
            Some(floor) => value >= floor,
            None => true,
        }
    }

    /// Full test for the pixel at absolute raster position (row, col)
    pub fn is_valid(&self, row: usize, col: usize, value: f32) -> bool {
        if !self.is_valid_value(value) {
            return false;
        }
        match &self.field {
            Some((polygon, transform)) => {
                let (x, y) = transform.apply(col as f64 + 0.5, row as f64 + 0.5);
                polygon.contains(&Point::new(x, y))
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rings_to_polygon;

    #[test]
    fn test_value_rules() {
        let filter = PixelFilter::new(Some(-9999.0), Some(0.0));
        assert!(filter.is_valid_value(0.3));
        assert!(filter.is_valid_value(0.0));
        assert!(!filter.is_valid_value(-0.2));
        assert!(!filter.is_valid_value(-9999.0));
        assert!(!filter.is_valid_value(f32::NAN));
        assert!(!filter.is_valid_value(f32::INFINITY));
        assert!(!PixelFilter::new(None, None).is_valid_value(f32::NEG_INFINITY));
    }

    #[test]
    fn test_field_mask_uses_pixel_centre() {
        let transform = GeoTransform::from_bounds(0.0, 0.0, 4.0, 4.0, 4, 4);
        // Western half of the raster
        let field = rings_to_polygon(&[vec![[0.0, 0.0], [2.0, 0.0], [2.0, 4.0], [0.0, 4.0], [0.0, 0.0]]]);
        let filter = PixelFilter::new(None, None).within_field(field, transform);
        assert!(filter.is_valid(0, 1, 0.5));
        assert!(!filter.is_valid(0, 2, 0.5));
    }
}
