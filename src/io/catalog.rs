use crate::geometry::BoundingBox;
use crate::types::{
    AcquisitionMode, DateRange, OrbitPass, Polarization, Scene, SceneMetadata, SensorKind,
    WaterResult,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Image collections the pipeline reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    /// Sentinel-2 level-2A surface reflectance
    Sentinel2SurfaceReflectance,
    /// Sentinel-1 ground range detected backscatter
    Sentinel1Grd,
}

impl Product {
    pub fn collection_id(&self) -> &'static str {
        match self {
            Product::Sentinel2SurfaceReflectance => "COPERNICUS/S2_SR",
            Product::Sentinel1Grd => "COPERNICUS/S1_GRD",
        }
    }

    pub fn sensor(&self) -> SensorKind {
        match self {
            Product::Sentinel2SurfaceReflectance => SensorKind::Optical,
            Product::Sentinel1Grd => SensorKind::Radar,
        }
    }
}

/// Comparison operator for numeric attribute filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Equal,
    NotEqual,
}

impl Comparison {
    pub fn apply(&self, value: f64, reference: f64) -> bool {
        match self {
            Comparison::LessThan => value < reference,
            Comparison::LessOrEqual => value <= reference,
            Comparison::GreaterThan => value > reference,
            Comparison::GreaterOrEqual => value >= reference,
            Comparison::Equal => value == reference,
            Comparison::NotEqual => value != reference,
        }
    }
}

/// Server-side predicate on scene metadata. A scene lacking the attribute
/// never matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeFilter {
    CloudyPixelPercentage(Comparison, f32),
    InstrumentMode(AcquisitionMode),
    OrbitPass(OrbitPass),
    /// Set membership: the product's polarisation list contains this one
    PolarizationsContain(Polarization),
}

impl AttributeFilter {
    pub fn matches(&self, metadata: &SceneMetadata) -> bool {
        match self {
            AttributeFilter::CloudyPixelPercentage(op, reference) => metadata
                .cloudy_pixel_percentage
                .map(|cloud| op.apply(cloud as f64, *reference as f64))
                .unwrap_or(false),
            AttributeFilter::InstrumentMode(mode) => metadata.instrument_mode == Some(*mode),
            AttributeFilter::OrbitPass(pass) => metadata.orbit_pass == Some(*pass),
            AttributeFilter::PolarizationsContain(pol) => metadata.polarizations.contains(pol),
        }
    }
}

/// One catalog request
#[derive(Debug, Clone)]
pub struct CatalogQuery {
    pub product: Product,
    /// Scenes whose footprint bounds intersect this box
    pub bounds: BoundingBox,
    pub date_range: DateRange,
    pub filters: Vec<AttributeFilter>,
    /// Per-request timeout the catalog client should apply
    pub timeout: Duration,
}

impl CatalogQuery {
    /// Whether `scene` satisfies every predicate of this query
    pub fn matches(&self, scene: &Scene) -> bool {
        scene.sensor() == self.product.sensor()
            && self.date_range.contains(scene.acquired())
            && scene.footprint().bounds().intersects(&self.bounds)
            && self.filters.iter().all(|f| f.matches(scene.metadata()))
    }
}

/// Access to an imagery catalog
pub trait ImageryCatalog: Send + Sync {
    /// Scenes matching `query`. Connectivity problems must be reported as
    /// `WaterError::TransientService` so the caller can retry.
    fn query(&self, query: &CatalogQuery) -> WaterResult<Vec<Scene>>;
}

/// Catalog backed by scenes held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    scenes: Vec<Scene>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_scenes(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }

    pub fn insert(&mut self, scene: Scene) {
        self.scenes.push(scene);
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl ImageryCatalog for InMemoryCatalog {
    fn query(&self, query: &CatalogQuery) -> WaterResult<Vec<Scene>> {
        let mut matched: Vec<Scene> = self
            .scenes
            .iter()
            .filter(|scene| query.matches(scene))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.acquired().cmp(&b.acquired()).then_with(|| a.id().cmp(b.id())));

        log::debug!(
            "{}: {} of {} scenes match",
            query.product.collection_id(),
            matched.len(),
            self.scenes.len()
        );
        Ok(matched)
    }
}
