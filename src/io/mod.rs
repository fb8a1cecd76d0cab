//! Raster I/O: the windowed raster abstraction and its backends

pub mod raster;
#[cfg(feature = "gdal")]
pub mod gdal_raster;

pub use raster::{chunk_rows, row_chunks, MemoryRaster, RasterOpener, RasterSource};
#[cfg(feature = "gdal")]
pub use gdal_raster::{write_ndvi_geotiff, GdalOpener, GdalRaster};
