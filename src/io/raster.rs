use crate::types::{GeoTransform, PixelWindow, ZoneError, ZoneResult};
use geo::{coord, Rect};
use ndarray::Array2;
use std::path::Path;

/// Bytes per NDVI sample (float32)
pub const BYTES_PER_PIXEL: usize = 4;

/// Georeferenced single-band NDVI raster with windowed access
pub trait RasterSource {
    /// Raster size as (width, height)
    fn size(&self) -> (usize, usize);

    /// Pixel→lon/lat transform
    fn geo_transform(&self) -> GeoTransform;

    /// CRS identifier, if the raster carries one
    fn crs(&self) -> Option<String>;

    /// Nodata sentinel
    fn nodata(&self) -> Option<f32>;

    /// Read a window as a (rows, cols) array. The window must lie inside the raster.
    fn read_window(&self, window: PixelWindow) -> ZoneResult<Array2<f32>>;

    fn width(&self) -> usize {
        self.size().0
    }

    fn height(&self) -> usize {
        self.size().1
    }

    fn full_window(&self) -> PixelWindow {
        let (width, height) = self.size();
        PixelWindow::new(0, 0, width, height)
    }

    /// Envelope of all four transformed raster corners
    fn bounds(&self) -> Rect<f64> {
        let (width, height) = self.size();
        let gt = self.geo_transform();
        let corners = [
            gt.apply(0.0, 0.0),
            gt.apply(width as f64, 0.0),
            gt.apply(0.0, height as f64),
            gt.apply(width as f64, height as f64),
        ];
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y })
    }

    /// Raw value of the pixel containing (x, y), if inside the raster
    fn sample(&self, x: f64, y: f64) -> ZoneResult<Option<f32>> {
        let inverse = self.geo_transform().invert()?;
        let (col, row) = inverse.apply(x, y);
        let (width, height) = self.size();
        if col < 0.0 || row < 0.0 || col >= width as f64 || row >= height as f64 {
            return Ok(None);
        }
        let window = PixelWindow::new(col.floor() as usize, row.floor() as usize, 1, 1);
        let data = self.read_window(window)?;
        Ok(data.get((0, 0)).copied())
    }
}

/// Opens raster files by path; each call yields an independent handle
pub trait RasterOpener: Send + Sync {
    fn open(&self, path: &Path) -> ZoneResult<Box<dyn RasterSource>>;
}

impl<F> RasterOpener for F
where
    F: Fn(&Path) -> ZoneResult<Box<dyn RasterSource>> + Send + Sync,
{
    fn open(&self, path: &Path) -> ZoneResult<Box<dyn RasterSource>> {
        self(path)
    }
}

/// Raster held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    data: Array2<f32>,
    transform: GeoTransform,
    nodata: Option<f32>,
    crs: Option<String>,
}

impl MemoryRaster {
    /// Wrap a (rows, cols) array; the transform must be invertible
    pub fn new(data: Array2<f32>, transform: GeoTransform) -> ZoneResult<Self> {
        transform.invert()?;
        Ok(Self {
            data,
            transform,
            nodata: None,
            crs: Some("EPSG:4326".to_string()),
        })
    }

    pub fn with_nodata(mut self, nodata: f32) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }
}

impl RasterSource for MemoryRaster {
    fn size(&self) -> (usize, usize) {
        let (rows, cols) = self.data.dim();
        (cols, rows)
    }

    fn geo_transform(&self) -> GeoTransform {
        self.transform
    }

    fn crs(&self) -> Option<String> {
        self.crs.clone()
    }

    fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    fn read_window(&self, window: PixelWindow) -> ZoneResult<Array2<f32>> {
        check_window(self.size(), window)?;
        let view = self.data.slice(ndarray::s![
            window.row..window.row + window.height,
            window.col..window.col + window.width
        ]);
        Ok(view.to_owned())
    }
}

/// Reject windows that do not lie inside a raster of `size`
pub fn check_window(size: (usize, usize), window: PixelWindow) -> ZoneResult<()> {
    let (width, height) = size;
    if window.col + window.width > width || window.row + window.height > height {
        return Err(ZoneError::InvalidInput(format!(
            "Window {:?} exceeds raster size {}x{}",
            window, width, height
        )));
    }
    Ok(())
}

/// Rows per chunk so that one full-width chunk fits into `budget_bytes`
pub fn chunk_rows(width: usize, height: usize, budget_bytes: usize) -> usize {
    let per_row = width.max(1) * BYTES_PER_PIXEL;
    (budget_bytes / per_row).min(height).max(1)
}

/// Full-width row windows covering the raster, each within the memory budget
pub fn row_chunks(width: usize, height: usize, budget_bytes: usize) -> impl Iterator<Item = PixelWindow> {
    let step = chunk_rows(width, height, budget_bytes);
    (0..height)
        .step_by(step)
        .map(move |row| PixelWindow::new(0, row, width, step.min(height - row)))
}
