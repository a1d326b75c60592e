//! Core water extent processing modules

pub mod coverage;
pub mod classify;
pub mod fusion;
pub mod integrate;
pub mod aggregate;
pub mod pipeline;

// Re-export main types
pub use coverage::{filter_by_coverage, passes_coverage, CoverageFilter, CoverageParams};
pub use classify::{
    normalized_difference, polarization_ratio_water, OpticalClassifier, OpticalClassifierParams,
    RadarClassifier, RadarClassifierParams, NDWI_BAND, RADAR_WATER_BAND,
};
pub use fusion::{fallback_band, fuse, fuse_pixels, RadarIndex, COMBINED_WATER_BAND};
pub use integrate::{integrate, water_area_band, AreaIntegrator};
pub use aggregate::{aggregate, aggregate_values, series_stats, sort_by_date, SeriesStats};
pub use pipeline::{
    run, Collaborators, DroppedScene, PipelineConfig, PipelineOutput, RadarSelection, RunSummary,
    Stage,
};
