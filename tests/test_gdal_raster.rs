#![cfg(feature = "gdal")]

use ndarray::Array2;
use ndvi_zones::io::write_ndvi_geotiff;
use ndvi_zones::{FieldPolygon, GdalRaster, GeoTransform, PixelWindow, RasterSource, ZonePipeline, ZoningParams};

#[test]
fn test_geotiff_round_trip_window() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("ndvi.tif");
    let data = Array2::from_shape_fn((6, 8), |(r, c)| (r * 8 + c) as f32 / 100.0);
    let transform = GeoTransform::from_bounds(10.0, 50.0, 10.008, 50.006, 8, 6);
    write_ndvi_geotiff(&path, &data, &transform, Some(-9999.0)).expect("write GeoTIFF");

    let raster = GdalRaster::open(&path).expect("open GeoTIFF");
    assert_eq!(raster.size(), (8, 6));
    assert_eq!(raster.nodata(), Some(-9999.0));
    assert_eq!(raster.crs().as_deref(), Some("EPSG:4326"));

    let window = raster.read_window(PixelWindow::new(2, 1, 3, 2)).expect("read window");
    assert_eq!(window.dim(), (2, 3));
    assert_eq!(window[[0, 0]], data[[1, 2]]);
    assert_eq!(window[[1, 2]], data[[2, 4]]);
    assert!(raster.read_window(PixelWindow::new(6, 0, 3, 1)).is_err());
}

#[test]
fn test_pipeline_on_geotiff() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("halves.tif");
    let data = Array2::from_shape_fn((4, 4), |(_, c)| if c < 2 { 0.1f32 } else { 0.8 });
    let transform = GeoTransform::from_bounds(10.0, 50.0, 10.004, 50.004, 4, 4);
    write_ndvi_geotiff(&path, &data, &transform, None).expect("write GeoTIFF");

    let raster = GdalRaster::open(&path).expect("open GeoTIFF");
    let field = FieldPolygon::new(
        vec![[10.0, 50.0], [10.004, 50.0], [10.004, 50.004], [10.0, 50.004], [10.0, 50.0]],
        vec![],
    );
    let params = ZoningParams {
        bands: 2,
        ..Default::default()
    };
    let bands = ZonePipeline::new(params).expect("pipeline").determine(&field, &raster).expect("zones");
    assert_eq!(bands.len(), 2);
    assert!(bands.iter().all(|b| b.zones.len() == 1));
}
