use chrono::NaiveDate;
use geo::{Coord, GeodesicArea, LineString, Polygon};
use serde::{Deserialize, Serialize};

/// A ring of (longitude, latitude) vertices
pub type Ring = Vec<[f64; 2]>;

/// Affine pixel→map transform in GDAL coefficient order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Build from the six GDAL coefficients
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// North-up transform mapping a `width`x`height` grid onto the given bounds
    pub fn from_bounds(west: f64, south: f64, east: f64, north: f64, width: usize, height: usize) -> Self {
        Self {
            top_left_x: west,
            pixel_width: (east - west) / width.max(1) as f64,
            rotation_x: 0.0,
            top_left_y: north,
            rotation_y: 0.0,
            pixel_height: (south - north) / height.max(1) as f64,
        }
    }

    /// Map a (fractional) pixel position to map coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y
    }

    /// Area covered by a single pixel in map units
    pub fn pixel_area(&self) -> f64 {
        self.determinant().abs()
    }

    /// Inverse transform (map → pixel), failing for singular transforms
    pub fn invert(&self) -> ZoneResult<GeoTransform> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON * 1e-6 || !det.is_finite() {
            return Err(ZoneError::InvalidInput(format!(
                "Geotransform {:?} is not invertible",
                self.to_gdal()
            )));
        }
        let inv_det = 1.0 / det;
        Ok(GeoTransform {
            top_left_x: (self.rotation_x * self.top_left_y - self.pixel_height * self.top_left_x) * inv_det,
            pixel_width: self.pixel_height * inv_det,
            rotation_x: -self.rotation_x * inv_det,
            top_left_y: (-self.pixel_width * self.top_left_y + self.rotation_y * self.top_left_x) * inv_det,
            rotation_y: -self.rotation_y * inv_det,
            pixel_height: self.pixel_width * inv_det,
        })
    }
}

/// Rectangular pixel window (column/row offset plus size)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col: usize,
    pub row: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn new(col: usize, row: usize, width: usize, height: usize) -> Self {
        Self { col, row, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Field boundary as drawn by the user: outer ring plus optional holes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPolygon {
    pub exterior: Ring,
    #[serde(default)]
    pub holes: Vec<Ring>,
}

impl FieldPolygon {
    pub fn new(exterior: Ring, holes: Vec<Ring>) -> Self {
        Self { exterior, holes }
    }

    /// Build from a `[shell, hole, hole, ...]` ring list
    pub fn from_rings(mut rings: Vec<Ring>) -> ZoneResult<Self> {
        if rings.is_empty() {
            return Err(ZoneError::InvalidInput("Field polygon has no rings".to_string()));
        }
        let exterior = rings.remove(0);
        Ok(Self { exterior, holes: rings })
    }

    pub fn rings(&self) -> Vec<Ring> {
        std::iter::once(self.exterior.clone())
            .chain(self.holes.iter().cloned())
            .collect()
    }

    /// Convert to a `geo` polygon after checking the simple-polygon contract
    pub fn to_polygon(&self) -> ZoneResult<Polygon<f64>> {
        crate::core::geometry::validate_field(self)?;
        Ok(rings_to_polygon(&self.rings()))
    }
}

/// Convert a polygon to its ring list (exterior first, rings closed)
pub fn polygon_to_rings(polygon: &Polygon<f64>) -> Vec<Ring> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect())
        .collect()
}

/// Build a polygon from a ring list; the first ring is the exterior
pub fn rings_to_polygon(rings: &[Ring]) -> Polygon<f64> {
    let to_line = |ring: &Ring| -> LineString<f64> {
        ring.iter().map(|p| Coord { x: p[0], y: p[1] }).collect()
    };
    match rings.split_first() {
        Some((exterior, holes)) => Polygon::new(to_line(exterior), holes.iter().map(to_line).collect()),
        None => Polygon::new(LineString::new(vec![]), vec![]),
    }
}

/// Serde adapter storing a polygon as a ring list
pub(crate) mod ring_list {
    use super::{polygon_to_rings, rings_to_polygon, Ring};
    use geo::Polygon;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(polygon: &Polygon<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        polygon_to_rings(polygon).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Polygon<f64>, D::Error> {
        let rings = Vec::<Ring>::deserialize(deserializer)?;
        Ok(rings_to_polygon(&rings))
    }
}

/// Half-open NDVI classification range `(low, high]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub index: usize,
    pub low: f64,
    pub high: f64,
}

impl Band {
    pub fn contains(&self, value: f64) -> bool {
        self.low < value && value <= self.high
    }
}

/// Interior sampling point of a zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepresentativePoint {
    pub longitude: f64,
    pub latitude: f64,
    pub ndvi: f64,
}

/// One output polygon of a band
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    #[serde(with = "ring_list")]
    pub polygon: Polygon<f64>,
    pub average_ndvi: f64,
    pub representative_point: Option<RepresentativePoint>,
}

/// All zones classified into one band
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandZones {
    pub band: Band,
    pub zones: Vec<Zone>,
}

/// Persistence key of a season's subfields
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeasonKey {
    pub user_id: i64,
    pub field_id: i64,
    pub season_id: String,
}

/// Zone record handed to persistence. Geometry is fixed at construction;
/// only the fertilizer recommendation can change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subfield {
    band_index: usize,
    rings: Vec<Ring>,
    area_m2: f64,
    average_ndvi: f64,
    recommended_fertilizer_amount: Option<f64>,
    representative_point: Option<RepresentativePoint>,
}

impl Subfield {
    pub fn from_zone(band_index: usize, zone: &Zone) -> Self {
        Self {
            band_index,
            rings: polygon_to_rings(&zone.polygon),
            area_m2: zone.polygon.geodesic_area_unsigned(),
            average_ndvi: zone.average_ndvi,
            recommended_fertilizer_amount: None,
            representative_point: zone.representative_point,
        }
    }

    pub fn band_index(&self) -> usize {
        self.band_index
    }

    pub fn rings(&self) -> &[Ring] {
        &self.rings
    }

    pub fn area_m2(&self) -> f64 {
        self.area_m2
    }

    pub fn average_ndvi(&self) -> f64 {
        self.average_ndvi
    }

    pub fn representative_point(&self) -> Option<&RepresentativePoint> {
        self.representative_point.as_ref()
    }

    pub fn recommended_fertilizer_amount(&self) -> Option<f64> {
        self.recommended_fertilizer_amount
    }

    pub fn set_recommended_fertilizer_amount(&mut self, amount: Option<f64>) {
        self.recommended_fertilizer_amount = amount;
    }
}

/// Everything one "determine subfields" invocation persists, as a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubfieldBatch {
    pub key: SeasonKey,
    pub capture_date: Option<NaiveDate>,
    pub subfields: Vec<Subfield>,
}

impl SubfieldBatch {
    pub fn from_bands(key: SeasonKey, capture_date: Option<NaiveDate>, bands: &[BandZones]) -> Self {
        let subfields = bands
            .iter()
            .flat_map(|band| band.zones.iter().map(move |zone| Subfield::from_zone(band.band.index, zone)))
            .collect();
        Self { key, capture_date, subfields }
    }

    pub fn is_empty(&self) -> bool {
        self.subfields.is_empty()
    }

    pub fn point_count(&self) -> usize {
        self.subfields
            .iter()
            .filter(|s| s.representative_point.is_some())
            .count()
    }
}

/// Error types for zoning operations
#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for zoning operations
pub type ZoneResult<T> = Result<T, ZoneError>;
