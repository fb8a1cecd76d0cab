use crate::io::raster::{check_window, RasterOpener, RasterSource};
use crate::types::{GeoTransform, PixelWindow, ZoneError, ZoneResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

const WGS84_EPSG: u32 = 4326;

/// NDVI raster backed by a GDAL dataset (band 1).
///
/// The handle is released when the value is dropped. Rasters in a projected
/// CRS are exposed through a north-up lon/lat transform derived from their
/// reprojected bounds, so downstream geometry is always WGS84.
pub struct GdalRaster {
    dataset: Dataset,
    transform: GeoTransform,
    nodata: Option<f32>,
    crs: Option<String>,
    size: (usize, usize),
}

impl GdalRaster {
    /// Open an NDVI raster
    pub fn open<P: AsRef<Path>>(path: P) -> ZoneResult<Self> {
        log::info!("Opening NDVI raster: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let (width, height) = dataset.raster_size();
        let native = GeoTransform::from_gdal(dataset.geo_transform()?);

        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value().map(|v| v as f32);

        log::debug!("Raster size: {}x{}", width, height);
        log::debug!("Raster geotransform: {:?}", native);
        log::debug!("Raster nodata: {:?}", nodata);

        let (transform, crs) = match dataset.spatial_ref() {
            Ok(spatial_ref) => {
                let code = spatial_ref.auth_code().ok();
                let crs = match (spatial_ref.auth_name(), code) {
                    (Ok(name), Some(code)) => Some(format!("{}:{}", name, code)),
                    _ => spatial_ref.to_proj4().ok(),
                };
                if code == Some(WGS84_EPSG as i32) {
                    (native, crs)
                } else {
                    log::info!("Reprojecting raster bounds from {:?} to EPSG:{}", crs, WGS84_EPSG);
                    (Self::wgs84_transform(&spatial_ref, &native, width, height)?, crs)
                }
            }
            Err(e) => {
                log::warn!("Raster has no spatial reference ({}), assuming lon/lat", e);
                (native, None)
            }
        };

        transform.invert()?;

        Ok(Self {
            dataset,
            transform,
            nodata,
            crs,
            size: (width, height),
        })
    }

    /// Lon/lat transform spanning the reprojected raster bounds
    fn wgs84_transform(
        source: &SpatialRef,
        native: &GeoTransform,
        width: usize,
        height: usize,
    ) -> ZoneResult<GeoTransform> {
        let mut source = source.clone();
        let mut target = SpatialRef::from_epsg(WGS84_EPSG)?;
        source.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
        target.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);

        let corners = [
            native.apply(0.0, 0.0),
            native.apply(width as f64, 0.0),
            native.apply(0.0, height as f64),
            native.apply(width as f64, height as f64),
        ];
        let min_x = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
        let min_y = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let max_y = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

        let transform = CoordTransform::new(&source, &target)?;
        let [west, south, east, north] = transform.transform_bounds(&[min_x, min_y, max_x, max_y], 21)?;
        log::debug!("WGS84 bounds: [{}, {}, {}, {}]", west, south, east, north);

        Ok(GeoTransform::from_bounds(west, south, east, north, width, height))
    }
}

impl RasterSource for GdalRaster {
    fn size(&self) -> (usize, usize) {
        self.size
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
        check_window(self.size, window)?;
        if window.is_empty() {
            return Ok(Array2::zeros((window.height, window.width)));
        }
        let rasterband = self.dataset.rasterband(1)?;
        let buffer = rasterband.read_as::<f32>(
            (window.col as isize, window.row as isize),
            (window.width, window.height),
            (window.width, window.height),
            None,
        )?;
        Array2::from_shape_vec((window.height, window.width), buffer.data)
            .map_err(|e| ZoneError::Processing(format!("Failed to reshape raster window: {}", e)))
    }
}

/// Opens every path as a fresh [`GdalRaster`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalOpener;

impl RasterOpener for GdalOpener {
    fn open(&self, path: &Path) -> ZoneResult<Box<dyn RasterSource>> {
        Ok(Box::new(GdalRaster::open(path)?))
    }
}

/// Write a float32 GeoTIFF (used to prepare rasters for processing and tests)
pub fn write_ndvi_geotiff<P: AsRef<Path>>(
    path: P,
    data: &Array2<f32>,
    transform: &GeoTransform,
    nodata: Option<f32>,
) -> ZoneResult<()> {
    log::info!("Writing NDVI GeoTIFF: {}", path.as_ref().display());

    let driver = gdal::DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = data.dim();
    let mut dataset = driver.create_with_band_type::<f32, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        1,
    )?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(WGS84_EPSG)?)?;

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<f32> = data.iter().cloned().collect();
    let buffer = gdal::raster::Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;
    if let Some(value) = nodata {
        rasterband.set_no_data_value(Some(value as f64))?;
    }
    Ok(())
}
