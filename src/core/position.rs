use geo::{BoundingRect, Centroid, Contains, Distance, Euclidean, Point, Polygon};
use rand::Rng;

pub const DEFAULT_SAMPLING_ATTEMPTS: usize = 100;

/// Picks one representative interior point per polygon
#[derive(Debug, Clone, Copy)]
pub struct PositionSelector {
    attempts: usize,
}

impl Default for PositionSelector {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLING_ATTEMPTS)
    }
}

impl PositionSelector {
    pub fn new(attempts: usize) -> Self {
        Self { attempts }
    }

    pub fn select(&self, polygon: &Polygon<f64>) -> Option<Point<f64>> {
        self.select_with(polygon, &mut rand::thread_rng())
    }

    /// Centroid when it lies inside, otherwise the contained random draw
    /// farthest from the boundary
    pub fn select_with<R: Rng + ?Sized>(&self, polygon: &Polygon<f64>, rng: &mut R) -> Option<Point<f64>> {
        if let Some(centroid) = polygon.centroid() {
            if polygon.contains(&centroid) {
                return Some(centroid);
            }
        }

        let rect = polygon.bounding_rect()?;
        let (min, max) = (rect.min(), rect.max());
        if !(min.x < max.x && min.y < max.y) {
            return None;
        }

        let mut best: Option<(Point<f64>, f64)> = None;
        for _ in 0..self.attempts {
            let candidate = Point::new(rng.gen_range(min.x..max.x), rng.gen_range(min.y..max.y));
            if !polygon.contains(&candidate) {
                continue;
            }
            let distance = boundary_distance(polygon, &candidate);
            if best.map_or(true, |(_, d)| distance > d) {
                best = Some((candidate, distance));
            }
        }

        if best.is_none() {
            log::warn!("No interior point found after {} draws", self.attempts);
        }
        best.map(|(point, _)| point)
    }
}

/// Distance from `point` to the nearest ring of `polygon`, holes included
pub fn boundary_distance(polygon: &Polygon<f64>, point: &Point<f64>) -> f64 {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .map(|ring| Euclidean.distance(point, ring))
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rings_to_polygon;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn u_shape() -> Polygon<f64> {
        // Centroid falls into the notch
        rings_to_polygon(&[vec![
            [0.0, 0.0],
            [3.0, 0.0],
            [3.0, 3.0],
            [2.0, 3.0],
            [2.0, 0.5],
            [1.0, 0.5],
            [1.0, 3.0],
            [0.0, 3.0],
            [0.0, 0.0],
        ]])
    }

    #[test]
    fn test_convex_polygon_returns_centroid() {
        let square = rings_to_polygon(&[vec![[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0], [0.0, 0.0]]]);
        let point = PositionSelector::default().select(&square).unwrap();
        assert_relative_eq!(point.x(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(point.y(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_concave_polygon_point_is_interior() {
        let polygon = u_shape();
        let centroid = polygon.centroid().unwrap();
        assert!(!polygon.contains(&centroid));

        let mut rng = StdRng::seed_from_u64(7);
        let point = PositionSelector::default().select_with(&polygon, &mut rng).unwrap();
        assert!(polygon.contains(&point));
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let polygon = u_shape();
        let a = PositionSelector::new(50).select_with(&polygon, &mut StdRng::seed_from_u64(42));
        let b = PositionSelector::new(50).select_with(&polygon, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_attempts_on_concave_polygon() {
        let point = PositionSelector::new(0).select_with(&u_shape(), &mut StdRng::seed_from_u64(1));
        assert!(point.is_none());
    }

    #[test]
    fn test_boundary_distance_includes_holes() {
        let polygon = rings_to_polygon(&[
            vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]],
            vec![[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0], [4.0, 4.0]],
        ]);
        assert_relative_eq!(boundary_distance(&polygon, &Point::new(2.0, 5.0)), 2.0, epsilon = 1e-12);
        assert_relative_eq!(boundary_distance(&polygon, &Point::new(7.0, 5.0)), 1.0, epsilon = 1e-12);
    }
}
