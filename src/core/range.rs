use crate::core::pixel_filter::PixelFilter;
use crate::io::raster::{row_chunks, RasterSource};
use crate::types::{Band, ZoneError, ZoneResult};
use serde::{Deserialize, Serialize};

/// Offset applied to the lowest band so the minimum value falls inside `(low, high]`
pub const LOWER_BOUND_EPSILON: f64 = 1e-7;

/// Observed NDVI extent over valid pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NdviRange {
    pub min: f64,
    pub max: f64,
    pub valid_pixels: usize,
}

/// Streams a raster in row chunks to find its valid NDVI range
pub struct NdviRangeEstimator {
    chunk_budget_bytes: usize,
}

impl NdviRangeEstimator {
    pub fn new(chunk_budget_bytes: usize) -> Self {
        Self { chunk_budget_bytes }
    }

    /// Min/max over valid pixels. Fails with `DataUnavailable` when there are none.
    pub fn estimate(&self, raster: &dyn RasterSource, filter: &PixelFilter) -> ZoneResult<NdviRange> {
        let (width, height) = raster.size();
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut valid_pixels = 0usize;

        for window in row_chunks(width, height, self.chunk_budget_bytes) {
            let chunk = raster.read_window(window)?;
            for ((r, c), &value) in chunk.indexed_iter() {
                if filter.is_valid(window.row + r, window.col + c, value) {
                    let value = value as f64;
                    min = min.min(value);
                    max = max.max(value);
                    valid_pixels += 1;
                }
            }
        }

        if valid_pixels == 0 {
            return Err(ZoneError::DataUnavailable(
                "Raster contains no valid NDVI pixels".to_string(),
            ));
        }

        log::debug!("NDVI range [{:.4}, {:.4}] over {} valid pixels", min, max, valid_pixels);
        Ok(NdviRange { min, max, valid_pixels })
    }

    /// Split `range` into `n` equal-width bands
    pub fn bands(range: &NdviRange, n: usize) -> Vec<Band> {
        let (min, max) = (range.min, range.max);
        if n < 2 {
            return vec![Band {
                index: 0,
                low: min - LOWER_BOUND_EPSILON,
                high: max,
            }];
        }

        let d = max - min;
        (0..n)
            .map(|i| {
                let low = if i == 0 {
                    min - LOWER_BOUND_EPSILON
                } else {
                    min + d * i as f64 / n as f64
                };
                let high = if i == n - 1 {
                    max
                } else {
                    min + d * (i + 1) as f64 / n as f64
                };
                Band { index: i, low, high }
            })
            .collect()
    }
}
