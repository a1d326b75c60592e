use crate::geometry::{Aoi, GeometryService};
use crate::types::{Scene, WaterError, WaterResult};
use serde::{Deserialize, Serialize};

/// Coverage filtering parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageParams {
    /// Minimum share of the AOI a footprint must cover (percent)
    pub threshold_percent: f64,
}

impl Default for CoverageParams {
    fn default() -> Self {
        Self {
            threshold_percent: 70.0,
        }
    }
}

impl CoverageParams {
    pub fn validate(&self) -> WaterResult<()> {
        if !(0.0..=100.0).contains(&self.threshold_percent) {
            return Err(WaterError::Configuration(format!(
                "Coverage threshold {} outside [0, 100]",
                self.threshold_percent
            )));
        }
        Ok(())
    }
}

/// Annotate `scene` with the percentage of the AOI its footprint covers
pub fn filter_by_coverage(
    scene: &Scene,
    aoi: &Aoi,
    geometry: &dyn GeometryService,
) -> WaterResult<Scene> {
    let covered_m2 = geometry.intersection_area_m2(scene.footprint(), aoi)?;
    let coverage = (covered_m2 / aoi.area_m2() * 100.0).clamp(0.0, 100.0);

    log::debug!("Scene {} covers {:.1}% of the AOI", scene.id(), coverage);

    let mut metadata = scene.metadata().clone();
    metadata.coverage_percentage = Some(coverage);
    scene.with_metadata(metadata)
}

/// Caller-side retention predicate; scenes never annotated are rejected
pub fn passes_coverage(scene: &Scene, threshold_percent: f64) -> bool {
    scene
        .metadata()
        .coverage_percentage
        .map(|coverage| coverage >= threshold_percent)
        .unwrap_or(false)
}

/// Coverage filter shared by both sensor tracks
pub struct CoverageFilter<'a> {
    params: CoverageParams,
    geometry: &'a dyn GeometryService,
}

impl<'a> CoverageFilter<'a> {
    pub fn new(params: CoverageParams, geometry: &'a dyn GeometryService) -> Self {
        Self { params, geometry }
    }

    /// Annotated scene if it passes the threshold, `None` if it is dropped
    pub fn apply(&self, scene: &Scene, aoi: &Aoi) -> WaterResult<Option<Scene>> {
        let annotated = filter_by_coverage(scene, aoi, self.geometry)?;
        if passes_coverage(&annotated, self.params.threshold_percent) {
            Ok(Some(annotated))
        } else {
            log::debug!(
                "Dropping scene {}: coverage below {}%",
                scene.id(),
                self.params.threshold_percent
            );
            Ok(None)
        }
    }
}
