use crate::core::geometry::union_polygons;
use crate::core::statistics::ZoneStatistics;
use crate::types::{Band, ZoneError, ZoneResult};
use geo::{Area, BooleanOps, BoundingRect, Coord, LineString, MinimumRotatedRect, Polygon};

/// Regular grid laid over a field's bounding frame.
///
/// Corners run `c0 → c1 → c2 → c3` around the frame; rows advance from the
/// `c0c1` side towards `c3c2`, columns from `c0c3` towards `c1c2`.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLayout {
    pub corners: [Coord<f64>; 4],
    pub nrows: usize,
    pub ncols: usize,
}

impl GridLayout {
    pub fn new(corners: [Coord<f64>; 4], regions: usize) -> Self {
        let [c0, c1, _, c3] = corners;
        let n = (regions.max(1) as f64).sqrt().floor();
        let w = (c1 - c0).x.hypot((c1 - c0).y);
        let h = (c3 - c0).x.hypot((c3 - c0).y);
        let m = (w * h).sqrt();
        let (nrows, ncols) = if m > 0.0 {
            ((n * h / m).floor() as usize, (n * w / m).floor() as usize)
        } else {
            (1, 1)
        };
        Self {
            corners,
            nrows: nrows.max(1),
            ncols: ncols.max(1),
        }
    }

    /// Bilinear interpolation of the frame corners at grid vertex (row, col)
    pub fn vertex(&self, row: usize, col: usize) -> Coord<f64> {
        let [c0, c1, c2, c3] = self.corners;
        let (nr, nc) = (self.nrows as f64, self.ncols as f64);
        let (r, c) = (row as f64, col as f64);
        let w0 = (nr - r) * (nc - c);
        let w1 = (nr - r) * c;
        let w2 = r * c;
        let w3 = r * (nc - c);
        let total = nr * nc;
        Coord {
            x: (c0.x * w0 + c1.x * w1 + c2.x * w2 + c3.x * w3) / total,
            y: (c0.y * w0 + c1.y * w1 + c2.y * w2 + c3.y * w3) / total,
        }
    }

    pub fn cell(&self, row: usize, col: usize) -> Polygon<f64> {
        let ring = LineString::new(vec![
            self.vertex(row, col),
            self.vertex(row, col + 1),
            self.vertex(row + 1, col + 1),
            self.vertex(row + 1, col),
            self.vertex(row, col),
        ]);
        Polygon::new(ring, vec![])
    }

    pub fn frame(&self) -> Polygon<f64> {
        let [c0, c1, c2, c3] = self.corners;
        Polygon::new(LineString::new(vec![c0, c1, c2, c3, c0]), vec![])
    }

    pub fn mean_cell_area(&self) -> f64 {
        self.frame().unsigned_area() / (self.nrows * self.ncols) as f64
    }
}

/// Fixed-cost segmentation: grid cells clipped to the field, classified by average NDVI
pub struct GridSplitter {
    regions: usize,
    rotated_frame: bool,
}

impl GridSplitter {
    pub fn new(regions: usize, rotated_frame: bool) -> Self {
        Self { regions, rotated_frame }
    }

    pub fn layout(&self, field: &Polygon<f64>) -> ZoneResult<GridLayout> {
        let corners = if self.rotated_frame {
            let frame = field
                .minimum_rotated_rect()
                .ok_or_else(|| ZoneError::Geometry("No rotated frame for an empty field".to_string()))?;
            let coords = &frame.exterior().0;
            if coords.len() < 4 {
                return Err(ZoneError::Geometry("Degenerate rotated frame".to_string()));
            }
            [coords[0], coords[1], coords[2], coords[3]]
        } else {
            let rect = field
                .bounding_rect()
                .ok_or_else(|| ZoneError::Geometry("No bounding box for an empty field".to_string()))?;
            let (min, max) = (rect.min(), rect.max());
            [
                Coord { x: min.x, y: min.y },
                Coord { x: max.x, y: min.y },
                Coord { x: max.x, y: max.y },
                Coord { x: min.x, y: max.y },
            ]
        };
        Ok(GridLayout::new(corners, self.regions))
    }

    /// Polygons with their average NDVI, one list per band
    pub fn split(
        &self,
        field: &Polygon<f64>,
        bands: &[Band],
        stats: &ZoneStatistics,
    ) -> ZoneResult<Vec<Vec<(Polygon<f64>, f64)>>> {
        if bands.is_empty() {
            return Ok(Vec::new());
        }
        let layout = self.layout(field)?;
        log::info!("Grid split with {}x{} cells", layout.nrows, layout.ncols);

        let mut classified: Vec<Vec<Polygon<f64>>> = vec![Vec::new(); bands.len()];
        let mut regions = 0usize;
        for row in 0..layout.nrows {
            for col in 0..layout.ncols {
                let clipped = field.intersection(&layout.cell(row, col));
                for part in clipped.0.into_iter().filter(|p| p.unsigned_area() > 0.0) {
                    let average = match stats.average_ndvi(&part)? {
                        Some(average) => average,
                        None => continue,
                    };
                    let index = bands
                        .iter()
                        .position(|band| average <= band.high)
                        .unwrap_or(bands.len() - 1);
                    classified[index].push(part);
                    regions += 1;
                }
            }
        }
        log::debug!("{} grid regions with valid pixels", regions);

        let threshold = 0.5 * layout.mean_cell_area();
        let mut result = Vec::with_capacity(bands.len());
        for polygons in classified {
            let kept: Vec<Polygon<f64>> = union_polygons(&polygons)
                .into_iter()
                .filter(|p| p.unsigned_area() >= threshold)
                .collect();
            result.push(stats.annotate(kept)?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pixel_filter::PixelFilter;
    use crate::io::MemoryRaster;
    use crate::types::{rings_to_polygon, GeoTransform};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        rings_to_polygon(&[vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]])
    }

    #[test]
    fn test_layout_follows_aspect_ratio() {
        let layout = GridSplitter::new(16, false).layout(&rect(0.0, 0.0, 8.0, 2.0)).unwrap();
        assert_eq!((layout.nrows, layout.ncols), (2, 8));
        assert_relative_eq!(layout.mean_cell_area(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_thin_field_keeps_one_row() {
        let layout = GridSplitter::new(4, false).layout(&rect(0.0, 0.0, 100.0, 1.0)).unwrap();
        assert_eq!(layout.nrows, 1);
        assert_eq!(layout.ncols, 20);
    }

    #[test]
    fn test_vertices_interpolate_corners() {
        let layout = GridSplitter::new(4, false).layout(&rect(0.0, 0.0, 4.0, 4.0)).unwrap();
        assert_eq!(layout.vertex(0, 0), Coord { x: 0.0, y: 0.0 });
        assert_eq!(layout.vertex(2, 2), Coord { x: 4.0, y: 4.0 });
        let mid = layout.vertex(1, 1);
        assert_relative_eq!(mid.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(mid.y, 2.0, epsilon = 1e-12);
        assert_relative_eq!(layout.cell(0, 1).unsigned_area(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotated_frame_hugs_diamond() {
        let diamond = rings_to_polygon(&[vec![[1.0, 0.0], [2.0, 1.0], [1.0, 2.0], [0.0, 1.0], [1.0, 0.0]]]);
        let axis = GridSplitter::new(4, false).layout(&diamond).unwrap();
        let rotated = GridSplitter::new(4, true).layout(&diamond).unwrap();
        assert_relative_eq!(axis.frame().unsigned_area(), 4.0, epsilon = 1e-9);
        assert_relative_eq!(rotated.frame().unsigned_area(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_split_halves() {
        let data = Array2::from_shape_fn((4, 4), |(_, c)| if c < 2 { 0.1 } else { 0.8 });
        let raster = MemoryRaster::new(data, GeoTransform::from_bounds(0.0, 0.0, 4.0, 4.0, 4, 4)).unwrap();
        let filter = PixelFilter::new(None, None);
        let stats = ZoneStatistics::new(&raster, &filter).unwrap();
        let bands = vec![
            Band { index: 0, low: 0.1 - 1e-7, high: 0.45 },
            Band { index: 1, low: 0.45, high: 0.8 },
        ];

        let zones = GridSplitter::new(16, false)
            .split(&rect(0.0, 0.0, 4.0, 4.0), &bands, &stats)
            .unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].len(), 1);
        assert_eq!(zones[1].len(), 1);
        assert_relative_eq!(zones[0][0].0.unsigned_area(), 8.0, epsilon = 1e-9);
        assert_relative_eq!(zones[0][0].1, 0.1, epsilon = 1e-6);
        assert_relative_eq!(zones[1][0].1, 0.8, epsilon = 1e-6);
    }
}
