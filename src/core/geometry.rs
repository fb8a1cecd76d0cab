//! Polygon helpers shared by the segmentation stages

use crate::types::{FieldPolygon, GeoTransform, Ring, ZoneError, ZoneResult};
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{unary_union, Area, Contains, Coord, Line, LineString, MultiPolygon, Polygon};

/// Union polygons and split the result into single polygons
pub fn union_polygons(polygons: &[Polygon<f64>]) -> Vec<Polygon<f64>> {
    if polygons.is_empty() {
        return Vec::new();
    }
    let merged: MultiPolygon<f64> = unary_union(polygons.iter());
    merged
        .0
        .into_iter()
        .filter(|polygon| polygon.unsigned_area() > 0.0)
        .collect()
}

pub fn total_area(polygons: &[Polygon<f64>]) -> f64 {
    polygons.iter().map(|p| p.unsigned_area()).sum()
}

/// Map-space quadrilateral of pixel (col, row), shrunk by `inset` pixels on every side
pub fn pixel_quad(transform: &GeoTransform, col: usize, row: usize, inset: f64) -> Polygon<f64> {
    let (c0, r0) = (col as f64 + inset, row as f64 + inset);
    let (c1, r1) = (col as f64 + 1.0 - inset, row as f64 + 1.0 - inset);
    let corners = [(c0, r0), (c1, r0), (c1, r1), (c0, r1)];
    let exterior: LineString<f64> = corners
        .iter()
        .map(|&(c, r)| {
            let (x, y) = transform.apply(c, r);
            Coord { x, y }
        })
        .collect();
    Polygon::new(exterior, vec![])
}

/// Check the simple-polygon contract of a field boundary
pub fn validate_field(field: &FieldPolygon) -> ZoneResult<()> {
    let exterior = validate_ring(&field.exterior, "exterior")?;
    let shell = Polygon::new(exterior, vec![]);
    if shell.unsigned_area() <= 0.0 {
        return Err(ZoneError::InvalidInput("Field exterior has zero area".to_string()));
    }

    for (i, hole) in field.holes.iter().enumerate() {
        let ring = validate_ring(hole, &format!("hole {}", i))?;
        let hole_polygon = Polygon::new(ring, vec![]);
        if !shell.contains(&hole_polygon) {
            return Err(ZoneError::InvalidInput(format!("Field hole {} lies outside the exterior", i)));
        }
    }
    Ok(())
}

/// Validate one ring and return it as a closed line string
fn validate_ring(ring: &Ring, label: &str) -> ZoneResult<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.len());
    for point in ring {
        if !point[0].is_finite() || !point[1].is_finite() {
            return Err(ZoneError::InvalidInput(format!("Field {} has a non-finite vertex", label)));
        }
        let coord = Coord { x: point[0], y: point[1] };
        if coords.last() != Some(&coord) {
            coords.push(coord);
        }
    }
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.len() < 3 {
        return Err(ZoneError::InvalidInput(format!(
            "Field {} needs at least 3 distinct vertices, got {}",
            label,
            coords.len()
        )));
    }

    let n = coords.len();
    let segments: Vec<Line<f64>> = (0..n).map(|i| Line::new(coords[i], coords[(i + 1) % n])).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(segments[i], segments[j]) {
                Some(LineIntersection::Collinear { .. }) => {
                    return Err(ZoneError::InvalidInput(format!(
                        "Field {} has overlapping edges {} and {}",
                        label, i, j
                    )));
                }
                Some(LineIntersection::SinglePoint { .. }) if !adjacent => {
                    return Err(ZoneError::InvalidInput(format!(
                        "Field {} self-intersects between edges {} and {}",
                        label, i, j
                    )));
                }
                _ => {}
            }
        }
    }

    let mut closed = coords;
    closed.push(closed[0]);
    Ok(LineString::new(closed))
}
