use crate::core::geometry::{total_area, union_polygons};
use geo::{Area, Polygon};
use serde::{Deserialize, Serialize};

/// Area bookkeeping of one merge run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub minimum_area: f64,
    pub area_before: f64,
    pub area_after: f64,
    pub dropped: usize,
    pub dropped_area: f64,
}

/// Absorbs polygons smaller than `total_area / max_subfields` into neighbouring bands
pub struct RegionMerger {
    max_subfields: usize,
}

impl RegionMerger {
    pub fn new(max_subfields: usize) -> Self {
        Self {
            max_subfields: max_subfields.max(1),
        }
    }

    /// Run the forward then the backward pass over `bands`.
    ///
    /// Band `b` absorbs the carried fragments by union; the parts that reach the
    /// minimum area stay in band `b`, the rest are carried on. Fragments still
    /// carried after both passes are dropped.
    pub fn merge(&self, bands: Vec<Vec<Polygon<f64>>>) -> (Vec<Vec<Polygon<f64>>>, MergeReport) {
        let area_before: f64 = bands.iter().map(|b| total_area(b)).sum();
        let minimum_area = area_before / self.max_subfields as f64;

        if bands.len() <= 1 {
            let report = MergeReport {
                minimum_area,
                area_before,
                area_after: area_before,
                dropped: 0,
                dropped_area: 0.0,
            };
            return (bands, report);
        }

        log::info!(
            "Merging {} bands, minimum area {:.6e} (total {:.6e}, max {} subfields)",
            bands.len(),
            minimum_area,
            area_before,
            self.max_subfields
        );

        let mut bands = bands;
        let mut carry: Vec<Polygon<f64>> = Vec::new();
        let n = bands.len();

        for i in 0..n - 1 {
            absorb(&mut bands, i, &mut carry, minimum_area);
            absorb(&mut bands, i + 1, &mut carry, minimum_area);
        }
        for i in (1..n).rev() {
            absorb(&mut bands, i, &mut carry, minimum_area);
            absorb(&mut bands, i - 1, &mut carry, minimum_area);
        }

        let dropped_area = total_area(&carry);
        if !carry.is_empty() {
            log::warn!(
                "Dropping {} fragments below the minimum area ({:.6e} total)",
                carry.len(),
                dropped_area
            );
        }

        let area_after: f64 = bands.iter().map(|b| total_area(b)).sum();
        let report = MergeReport {
            minimum_area,
            area_before,
            area_after,
            dropped: carry.len(),
            dropped_area,
        };
        log::debug!("Merge report: {:?}", report);
        (bands, report)
    }
}

fn absorb(bands: &mut [Vec<Polygon<f64>>], index: usize, carry: &mut Vec<Polygon<f64>>, minimum_area: f64) {
    let merged = if carry.is_empty() {
        std::mem::take(&mut bands[index])
    } else {
        let mut all = std::mem::take(&mut bands[index]);
        all.append(carry);
        union_polygons(&all)
    };

    let (keep, small): (Vec<_>, Vec<_>) = merged
        .into_iter()
        .partition(|polygon| polygon.unsigned_area() >= minimum_area);
    bands[index] = keep;
    *carry = small;
}
