use crate::core::pixel_filter::PixelFilter;
use crate::io::raster::RasterSource;
use crate::types::{GeoTransform, PixelWindow, ZoneResult};
use geo::{BoundingRect, Polygon};
use ndarray::Array2;

/// Pixel quads are shrunk by this fraction of a pixel so that touching edges do not count
const EDGE_INSET: f64 = 1e-3;

/// Average NDVI of polygons, reading only the window each one covers
pub struct ZoneStatistics<'a> {
    raster: &'a dyn RasterSource,
    filter: &'a PixelFilter,
    inverse: GeoTransform,
}

impl<'a> ZoneStatistics<'a> {
    pub fn new(raster: &'a dyn RasterSource, filter: &'a PixelFilter) -> ZoneResult<Self> {
        let inverse = raster.geo_transform().invert()?;
        Ok(Self { raster, filter, inverse })
    }

    /// Pixel window covering the polygon's bounding box, clamped to the raster
    pub fn pixel_window(&self, polygon: &Polygon<f64>) -> Option<PixelWindow> {
        let rect = polygon.bounding_rect()?;
        let (min, max) = (rect.min(), rect.max());
        let corners = [
            self.inverse.apply(min.x, min.y),
            self.inverse.apply(max.x, min.y),
            self.inverse.apply(max.x, max.y),
            self.inverse.apply(min.x, max.y),
        ];
        let col_min = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min).floor();
        let col_max = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max).ceil();
        let row_min = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min).floor();
        let row_max = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max).ceil();

        let (width, height) = self.raster.size();
        let col0 = col_min.max(0.0);
        let row0 = row_min.max(0.0);
        let col1 = col_max.min(width as f64);
        let row1 = row_max.min(height as f64);
        if !(col0 < col1 && row0 < row1) {
            return None;
        }
        Some(PixelWindow::new(
            col0 as usize,
            row0 as usize,
            (col1 - col0) as usize,
            (row1 - row0) as usize,
        ))
    }

    /// Mean of the valid pixels the polygon reaches into, `None` if there are none
    pub fn average_ndvi(&self, polygon: &Polygon<f64>) -> ZoneResult<Option<f64>> {
        let window = match self.pixel_window(polygon) {
            Some(window) => window,
            None => return Ok(None),
        };
        let values = self.raster.read_window(window)?;
        let touched = self.touched_mask(polygon, window);

        let mut sum = 0.0f64;
        let mut count = 0usize;
        for ((r, c), &value) in values.indexed_iter() {
            if touched[[r, c]] && self.filter.is_valid(window.row + r, window.col + c, value) {
                sum += value as f64;
                count += 1;
            }
        }

        if count == 0 {
            return Ok(None);
        }
        Ok(Some(sum / count as f64))
    }

    /// Attach averages, dropping polygons without a statistic
    pub fn annotate(&self, polygons: Vec<Polygon<f64>>) -> ZoneResult<Vec<(Polygon<f64>, f64)>> {
        let mut annotated = Vec::with_capacity(polygons.len());
        for polygon in polygons {
            match self.average_ndvi(&polygon)? {
                Some(average) => annotated.push((polygon, average)),
                None => log::debug!("Skipping polygon without valid pixels"),
            }
        }
        Ok(annotated)
    }

    /// Valid raster value at a map position
    pub fn sample_point(&self, x: f64, y: f64) -> ZoneResult<Option<f64>> {
        let (col, row) = self.inverse.apply(x, y);
        let (width, height) = self.raster.size();
        if col < 0.0 || row < 0.0 || col >= width as f64 || row >= height as f64 {
            return Ok(None);
        }
        let (col, row) = (col.floor() as usize, row.floor() as usize);
        let values = self.raster.read_window(PixelWindow::new(col, row, 1, 1))?;
        Ok(values
            .get((0, 0))
            .copied()
            .filter(|&value| self.filter.is_valid(row, col, value))
            .map(f64::from))
    }

    /// Pixels of `window` the polygon reaches into.
    ///
    /// A pixel is touched when its centre lies inside the polygon or a ring
    /// edge crosses the pixel shrunk by `EDGE_INSET`. Centres are filled per
    /// row from the ring crossings (even-odd, so holes drop out) and edges are
    /// walked row by row, so the cost follows the window area plus the ring
    /// length rather than their product.
    fn touched_mask(&self, polygon: &Polygon<f64>, window: PixelWindow) -> Array2<bool> {
        let (rows, cols) = (window.height, window.width);
        let mut mask = Array2::from_elem((rows, cols), false);
        if rows == 0 || cols == 0 {
            return mask;
        }

        // Ring edges in window-relative pixel coordinates
        let mut edges: Vec<((f64, f64), (f64, f64))> = Vec::new();
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors().iter()) {
            let points: Vec<(f64, f64)> = ring
                .coords()
                .map(|c| {
                    let (col, row) = self.inverse.apply(c.x, c.y);
                    (col - window.col as f64, row - window.row as f64)
                })
                .collect();
            edges.extend(points.windows(2).map(|pair| (pair[0], pair[1])));
        }

        let mut crossings = Vec::new();
        for r in 0..rows {
            let y = r as f64 + 0.5;
            crossings.clear();
            for &(a, b) in &edges {
                if (a.1 <= y) != (b.1 <= y) {
                    crossings.push(a.0 + (y - a.1) * (b.0 - a.0) / (b.1 - a.1));
                }
            }
            crossings.sort_by(f64::total_cmp);
            for span in crossings.chunks_exact(2) {
                // Columns whose centre c + 0.5 lies strictly between the crossings
                let first = ((span[0] - 0.5).floor() + 1.0).max(0.0);
                let last = ((span[1] - 0.5).ceil() - 1.0).min(cols as f64 - 1.0);
                if first <= last {
                    for c in first as usize..=last as usize {
                        mask[[r, c]] = true;
                    }
                }
            }
        }

        for &(a, b) in &edges {
            mark_edge(&mut mask, a, b);
        }
        mask
    }
}

/// Mark every pixel whose inset square the segment `a`-`b` meets
fn mark_edge(mask: &mut Array2<bool>, a: (f64, f64), b: (f64, f64)) {
    let (rows, cols) = mask.dim();
    let (y_lo, y_hi) = (a.1.min(b.1), a.1.max(b.1));
    let first_row = (y_lo - 1.0 + EDGE_INSET).ceil().max(0.0);
    let last_row = (y_hi - EDGE_INSET).floor().min(rows as f64 - 1.0);
    if first_row > last_row {
        return;
    }

    let dy = b.1 - a.1;
    for r in first_row as usize..=last_row as usize {
        // Part of the segment inside the row's inset strip
        let (x0, x1) = if dy == 0.0 {
            (a.0, b.0)
        } else {
            let t0 = (r as f64 + EDGE_INSET - a.1) / dy;
            let t1 = (r as f64 + 1.0 - EDGE_INSET - a.1) / dy;
            let (t_lo, t_hi) = (t0.min(t1).max(0.0), t0.max(t1).min(1.0));
            if t_lo > t_hi {
                continue;
            }
            (a.0 + t_lo * (b.0 - a.0), a.0 + t_hi * (b.0 - a.0))
        };
        let (x_lo, x_hi) = (x0.min(x1), x0.max(x1));
        let first_col = (x_lo - 1.0 + EDGE_INSET).ceil().max(0.0);
        let last_col = (x_hi - EDGE_INSET).floor().min(cols as f64 - 1.0);
        if first_col > last_col {
            continue;
        }
        for c in first_col as usize..=last_col as usize {
            mask[[r, c]] = true;
        }
    }
}
