//! ndvi-zones: NDVI-based subfield zoning for agricultural fields
//!
//! Splits a field into a small set of zones of similar vegetation vigour from a
//! prepared NDVI raster, and picks one representative sampling point per zone
//! for soil measurements and fertilizer recommendations.

pub mod types;
pub mod io;
pub mod core;
pub mod service;

// Re-export main types and functions for easier access
pub use types::{
    Band, BandZones, FieldPolygon, GeoTransform, PixelWindow, RepresentativePoint, Ring, SeasonKey,
    Subfield, SubfieldBatch, Zone, ZoneError, ZoneResult,
};

pub use io::{MemoryRaster, RasterOpener, RasterSource};
#[cfg(feature = "gdal")]
pub use io::{GdalOpener, GdalRaster};

pub use crate::core::{BoundedExecutor, SplitStrategy, Vectorization, WorkerFailure, ZonePipeline, ZoningParams};
pub use service::{
    apply_recommendations, EventBus, FertilizerRecommender, LinearRecommender, NdviRasterProvider,
    NutrientLevels, ProcessWorker, SubfieldService, SubfieldStore, ThreadWorker, ZoningWorker,
};
