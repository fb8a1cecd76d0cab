//! Core zoning modules

pub mod executor;
pub mod geometry;
pub mod grid;
pub mod merge;
pub mod pipeline;
pub mod pixel_filter;
pub mod position;
pub mod range;
pub mod statistics;
pub mod vectorize;

// Re-export main types
pub use executor::{BoundedExecutor, WorkerFailure};
pub use grid::{GridLayout, GridSplitter};
pub use merge::{MergeReport, RegionMerger};
pub use pipeline::{SplitStrategy, ZonePipeline, ZoningParams};
pub use pixel_filter::PixelFilter;
pub use position::PositionSelector;
pub use range::{NdviRange, NdviRangeEstimator};
pub use statistics::ZoneStatistics;
pub use vectorize::{Vectorization, ZoneVectorizer};
