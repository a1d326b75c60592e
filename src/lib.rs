//! waterfuse: Fused Sentinel-1 / Sentinel-2 Surface Water Time Series
//!
//! Queries optical and radar scenes over an area of interest, keeps the ones
//! that cover enough of it, classifies water in each, fills cloud-masked optical
//! pixels from a same-day radar acquisition, integrates water area per scene and
//! reduces the series to yearly statistics.

pub mod types;
pub mod geometry;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    AcquisitionMode, AreaRecord, Band, ClassifiedScene, DateRange, FusedScene, GeoTransform,
    OrbitPass, Polarization, Scene, SceneMetadata, SensorKind, WaterError, WaterResult,
    YearlyStat,
};

pub use geometry::{Aoi, BoundingBox, GeometryService, PlanarGeometry, Point, Polygon};

pub use io::{
    CancellationToken, CatalogQuery, GridAreaReducer, ImageryCatalog, InMemoryCatalog,
    ReduceParams, RetryPolicy, ZonalAreaReducer,
};

pub use crate::core::{
    aggregate, run, series_stats, Collaborators, PipelineConfig, PipelineOutput, RunSummary,
    SeriesStats,
};
