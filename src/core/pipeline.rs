use crate::core::executor::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
use crate::core::grid::GridSplitter;
use crate::core::merge::RegionMerger;
use crate::core::pixel_filter::PixelFilter;
use crate::core::position::{PositionSelector, DEFAULT_SAMPLING_ATTEMPTS};
use crate::core::range::NdviRangeEstimator;
use crate::core::statistics::ZoneStatistics;
use crate::core::vectorize::{Vectorization, ZoneVectorizer};
use crate::io::raster::RasterSource;
use crate::types::{BandZones, FieldPolygon, RepresentativePoint, Zone, ZoneError, ZoneResult};
use geo::Polygon;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How the field is segmented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Band masks vectorized from pixels, then merged by area
    #[default]
    PixelBased,
    /// Regular grid cells classified by their average
    GridBased,
}

/// Parameters for subfield determination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoningParams {
    /// Number of NDVI bands
    pub bands: usize,
    /// Upper bound on output polygons, sets the merge threshold
    pub max_subfields: usize,
    /// Memory budget per streamed row chunk
    pub chunk_budget_bytes: usize,
    pub vectorization: Vectorization,
    /// 3x3 mean over valid pixels before classification
    pub smoothing: bool,
    /// Values below this floor are treated as invalid
    pub min_valid: Option<f32>,
    /// Random draws when the centroid falls outside a polygon
    pub sampling_attempts: usize,
    pub strategy: SplitStrategy,
    /// Target cell count of the grid strategy
    pub grid_regions: usize,
    /// Lay the grid over the minimum rotated rectangle instead of the bounding box
    pub rotated_frame: bool,
    pub timeout_secs: f64,
    pub poll_interval_ms: u64,
}

impl Default for ZoningParams {
    fn default() -> Self {
        Self {
            bands: 3,
            max_subfields: 256,
            chunk_budget_bytes: 1 << 20, // 1 MiB
            vectorization: Vectorization::WholeRaster,
            smoothing: false,
            min_valid: None,
            sampling_attempts: DEFAULT_SAMPLING_ATTEMPTS,
            strategy: SplitStrategy::PixelBased,
            grid_regions: 256,
            rotated_frame: false,
            timeout_secs: DEFAULT_TIMEOUT.as_secs_f64(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl ZoningParams {
    /// Load parameters from a JSON file; missing keys keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ZoneResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let params: Self = serde_json::from_str(&content)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> ZoneResult<()> {
        if self.bands == 0 || self.bands >= u16::MAX as usize {
            return Err(ZoneError::InvalidInput(format!(
                "bands must be between 1 and {}, got {}",
                u16::MAX - 1,
                self.bands
            )));
        }
        if self.max_subfields == 0 {
            return Err(ZoneError::InvalidInput("max_subfields must be positive".to_string()));
        }
        if self.chunk_budget_bytes == 0 {
            return Err(ZoneError::InvalidInput("chunk_budget_bytes must be positive".to_string()));
        }
        if self.grid_regions == 0 {
            return Err(ZoneError::InvalidInput("grid_regions must be positive".to_string()));
        }
        if let Some(floor) = self.min_valid {
            if !floor.is_finite() {
                return Err(ZoneError::InvalidInput("min_valid must be finite".to_string()));
            }
        }
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(ZoneError::InvalidInput(format!(
                "timeout_secs must be positive, got {}",
                self.timeout_secs
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ZoneError::InvalidInput("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Field + NDVI raster → banded zones with averages and sampling points
#[derive(Debug, Clone)]
pub struct ZonePipeline {
    params: ZoningParams,
}

impl ZonePipeline {
    pub fn new(params: ZoningParams) -> ZoneResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &ZoningParams {
        &self.params
    }

    pub fn determine(&self, field: &FieldPolygon, raster: &dyn RasterSource) -> ZoneResult<Vec<BandZones>> {
        self.determine_with_rng(field, raster, &mut rand::thread_rng())
    }

    /// Determine zones with an explicit random source for point sampling.
    ///
    /// An invalid field is an error. A raster without valid pixels inside the
    /// field yields an empty list, as does any other failure (logged).
    pub fn determine_with_rng<R: Rng + ?Sized>(
        &self,
        field: &FieldPolygon,
        raster: &dyn RasterSource,
        rng: &mut R,
    ) -> ZoneResult<Vec<BandZones>> {
        let polygon = field.to_polygon()?;

        match self.segment(&polygon, raster, rng) {
            Ok(bands) => Ok(bands),
            Err(ZoneError::DataUnavailable(reason)) => {
                log::warn!("No zones determined: {}", reason);
                Ok(Vec::new())
            }
            Err(e) => {
                log::error!("Zone determination failed: {}", e);
                Ok(Vec::new())
            }
        }
    }

    fn segment<R: Rng + ?Sized>(
        &self,
        field: &Polygon<f64>,
        raster: &dyn RasterSource,
        rng: &mut R,
    ) -> ZoneResult<Vec<BandZones>> {
        let params = &self.params;
        let (width, height) = raster.size();
        log::info!(
            "Determining zones: {}x{} raster, {} bands, {:?} strategy",
            width,
            height,
            params.bands,
            params.strategy
        );

        let filter = PixelFilter::new(raster.nodata(), params.min_valid).within_field(field.clone(), raster.geo_transform());
        let range = NdviRangeEstimator::new(params.chunk_budget_bytes).estimate(raster, &filter)?;
        let bands = NdviRangeEstimator::bands(&range, params.bands);
        let stats = ZoneStatistics::new(raster, &filter)?;

        let annotated = match params.strategy {
            SplitStrategy::PixelBased => {
                let vectorizer = ZoneVectorizer::new(params.vectorization, params.chunk_budget_bytes, params.smoothing);
                let traced = vectorizer.vectorize(raster, &filter, &bands)?;
                let (merged, report) = RegionMerger::new(params.max_subfields).merge(traced);
                log::info!(
                    "Merged zones cover {:.1}% of the traced area",
                    if report.area_before > 0.0 {
                        100.0 * report.area_after / report.area_before
                    } else {
                        100.0
                    }
                );
                merged
                    .into_iter()
                    .map(|polygons| stats.annotate(polygons))
                    .collect::<ZoneResult<Vec<_>>>()?
            }
            SplitStrategy::GridBased => {
                GridSplitter::new(params.grid_regions, params.rotated_frame).split(field, &bands, &stats)?
            }
        };

        let selector = PositionSelector::new(params.sampling_attempts);
        let mut result = Vec::with_capacity(bands.len());
        for (band, polygons) in bands.into_iter().zip(annotated) {
            let mut zones = Vec::with_capacity(polygons.len());
            for (polygon, average_ndvi) in polygons {
                let representative_point = representative_point(&polygon, average_ndvi, &stats, &selector, rng)?;
                zones.push(Zone {
                    polygon,
                    average_ndvi,
                    representative_point,
                });
            }
            result.push(BandZones { band, zones });
        }

        let zone_count: usize = result.iter().map(|b| b.zones.len()).sum();
        log::info!("✅ Determined {} zones in {} bands", zone_count, result.len());
        Ok(result)
    }
}

/// Interior point with the raster value under it, falling back to the zone average
fn representative_point<R: Rng + ?Sized>(
    polygon: &Polygon<f64>,
    average_ndvi: f64,
    stats: &ZoneStatistics,
    selector: &PositionSelector,
    rng: &mut R,
) -> ZoneResult<Option<RepresentativePoint>> {
    let point = match selector.select_with(polygon, rng) {
        Some(point) => point,
        None => return Ok(None),
    };
    let ndvi = stats.sample_point(point.x(), point.y())?.unwrap_or(average_ndvi);
    Ok(Some(RepresentativePoint {
        longitude: point.x(),
        latitude: point.y(),
        ndvi,
    }))
}
