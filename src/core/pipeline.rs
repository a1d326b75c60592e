//! End-to-end water extent pipeline: catalog → coverage → classification →
//! same-day fusion → area integration → yearly statistics.

use crate::core::aggregate::{aggregate, series_stats, sort_by_date, SeriesStats};
use crate::core::classify::{
    OpticalClassifier, OpticalClassifierParams, RadarClassifier, RadarClassifierParams,
};
use crate::core::coverage::{CoverageFilter, CoverageParams};
use crate::core::fusion::{fuse, RadarIndex};
use crate::core::integrate::AreaIntegrator;
use crate::geometry::{Aoi, GeometryService};
use crate::io::catalog::{AttributeFilter, CatalogQuery, Comparison, ImageryCatalog, Product};
use crate::io::reducer::{ReduceParams, ZonalAreaReducer};
use crate::io::retry::{with_retry, CancellationToken, RetryPolicy};
use crate::types::{
    AcquisitionMode, AreaRecord, ClassifiedScene, DateRange, OrbitPass, Polarization, Scene,
    SensorKind, WaterError, WaterResult, YearlyStat,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Catalog-side selection of radar acquisitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarSelection {
    pub instrument_mode: Option<AcquisitionMode>,
    /// Every listed polarisation must be present in the product
    pub required_polarizations: Vec<Polarization>,
    pub orbit_pass: Option<OrbitPass>,
}

impl Default for RadarSelection {
    fn default() -> Self {
        Self {
            instrument_mode: Some(AcquisitionMode::IW),
            required_polarizations: vec![Polarization::VV, Polarization::VH],
            orbit_pass: Some(OrbitPass::Ascending),
        }
    }
}

impl RadarSelection {
    pub fn filters(&self) -> Vec<AttributeFilter> {
        let mut filters = Vec::new();
        if let Some(mode) = self.instrument_mode {
            filters.push(AttributeFilter::InstrumentMode(mode));
        }
        filters.extend(
            self.required_polarizations
                .iter()
                .map(|p| AttributeFilter::PolarizationsContain(*p)),
        );
        if let Some(pass) = self.orbit_pass {
            filters.push(AttributeFilter::OrbitPass(pass));
        }
        filters
    }
}

/// Complete run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum AOI coverage, applied to both sensors
    pub coverage: CoverageParams,
    /// Optical scenes must have a cloudy pixel percentage strictly below this
    pub cloud_threshold_percent: f32,
    pub optical: OpticalClassifierParams,
    pub radar: RadarClassifierParams,
    pub radar_selection: RadarSelection,
    pub reduce: ReduceParams,
    pub retry: RetryPolicy,
    /// Per-request timeout for catalog queries
    pub catalog_timeout: Duration,
    /// Worker threads for per-scene stages; `None` uses the global pool
    pub workers: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            coverage: CoverageParams::default(),
            cloud_threshold_percent: 20.0,
            optical: OpticalClassifierParams::default(),
            radar: RadarClassifierParams::default(),
            radar_selection: RadarSelection::default(),
            reduce: ReduceParams::default(),
            retry: RetryPolicy::default(),
            catalog_timeout: Duration::from_secs(60),
            workers: None,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration; missing fields take defaults
    pub fn from_json_str(json: &str) -> WaterResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> WaterResult<Self> {
        log::info!("Reading pipeline configuration: {}", path.as_ref().display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> WaterResult<()> {
        self.coverage.validate()?;
        if !(0.0..=100.0).contains(&self.cloud_threshold_percent) {
            return Err(WaterError::Configuration(format!(
                "Cloud threshold {} outside [0, 100]",
                self.cloud_threshold_percent
            )));
        }
        self.radar.validate()?;
        self.reduce.validate()?;
        self.retry.validate()?;
        if self.workers == Some(0) {
            return Err(WaterError::Configuration(
                "Worker count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn optical_query(&self, aoi: &Aoi, date_range: &DateRange) -> CatalogQuery {
        CatalogQuery {
            product: Product::Sentinel2SurfaceReflectance,
            bounds: *aoi.bounds(),
            date_range: *date_range,
            filters: vec![AttributeFilter::CloudyPixelPercentage(
                Comparison::LessThan,
                self.cloud_threshold_percent,
            )],
            timeout: self.catalog_timeout,
        }
    }

    pub fn radar_query(&self, aoi: &Aoi, date_range: &DateRange) -> CatalogQuery {
        CatalogQuery {
            product: Product::Sentinel1Grd,
            bounds: *aoi.bounds(),
            date_range: *date_range,
            filters: self.radar_selection.filters(),
            timeout: self.catalog_timeout,
        }
    }
}

/// External services a run talks to
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub catalog: &'a dyn ImageryCatalog,
    pub reducer: &'a dyn ZonalAreaReducer,
    pub geometry: &'a dyn GeometryService,
}

/// Stage at which a scene left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Coverage,
    Classification,
    Fusion,
    Integration,
}

/// A scene removed by a per-scene failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedScene {
    pub scene_id: String,
    pub sensor: SensorKind,
    pub stage: Stage,
    pub reason: String,
}

/// What happened to the scenes of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub optical_found: usize,
    /// Optical scenes passing the coverage threshold
    pub optical_retained: usize,
    pub radar_found: usize,
    /// Radar scenes passing the coverage threshold
    pub radar_retained: usize,
    /// Radar catalog unreachable; every optical scene used the no-water fallback
    pub radar_query_failed: bool,
    pub fused_with_radar: usize,
    pub fused_without_radar: usize,
    /// Scenes whose area is missing because the pixel budget was exceeded
    pub resource_limited: Vec<String>,
    pub dropped: Vec<DroppedScene>,
}

/// Result of a run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    /// Per-date water areas, ordered by date
    pub records: Vec<AreaRecord>,
    /// Yearly statistics, ordered by year
    pub yearly: Vec<YearlyStat>,
    /// Statistics over the whole series
    pub series: SeriesStats,
    pub summary: RunSummary,
}

/// Maps per-scene work over a collection, in parallel when enabled
struct Executor {
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl Executor {
    #[cfg(feature = "parallel")]
    fn new(workers: Option<usize>) -> WaterResult<Self> {
        let pool = match workers {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| {
                        WaterError::Processing(format!("Failed to build worker pool: {}", e))
                    })?,
            ),
            None => None,
        };
        Ok(Self { pool })
    }

    #[cfg(not(feature = "parallel"))]
    fn new(workers: Option<usize>) -> WaterResult<Self> {
        if workers.is_some() {
            log::debug!("Built without the parallel feature, ignoring worker count");
        }
        Ok(Self {})
    }

    /// Output order matches input order
    #[cfg(feature = "parallel")]
    fn map<T, U, F>(&self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        use rayon::prelude::*;
        let run = || items.par_iter().map(&f).collect::<Vec<U>>();
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn map<T, U, F>(&self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        items.iter().map(f).collect()
    }
}

/// Cancellation aborts the run; any other per-scene error drops the scene
fn drop_scene(scene_id: &str, sensor: SensorKind, stage: Stage, e: WaterError) -> WaterResult<DroppedScene> {
    if let WaterError::Cancelled = e {
        return Err(e);
    }
    log::warn!("Dropping {} scene {} at {:?}: {}", sensor, scene_id, stage, e);
    Ok(DroppedScene {
        scene_id: scene_id.to_string(),
        sensor,
        stage,
        reason: e.to_string(),
    })
}

enum Prepared {
    Retained(ClassifiedScene),
    BelowCoverage,
    Dropped(DroppedScene),
    /// Passed coverage but failed classification
    Unclassified(DroppedScene),
}

fn prepare_scene<F>(
    scene: &Scene,
    aoi: &Aoi,
    coverage: &CoverageFilter<'_>,
    classify: &F,
    cancel: &CancellationToken,
) -> WaterResult<Prepared>
where
    F: Fn(&Scene) -> WaterResult<ClassifiedScene>,
{
    cancel.check()?;
    let annotated = match coverage.apply(scene, aoi) {
        Ok(Some(annotated)) => annotated,
        Ok(None) => return Ok(Prepared::BelowCoverage),
        Err(e) => {
            return drop_scene(scene.id(), scene.sensor(), Stage::Coverage, e).map(Prepared::Dropped)
        }
    };
    match classify(&annotated) {
        Ok(classified) => Ok(Prepared::Retained(classified)),
        Err(e) => drop_scene(scene.id(), scene.sensor(), Stage::Classification, e)
            .map(Prepared::Unclassified),
    }
}

/// Stages 1 and 2 for one sensor track; returns the retained count and the
/// classified scenes
fn prepare_track<F>(
    executor: &Executor,
    scenes: &[Scene],
    aoi: &Aoi,
    coverage: &CoverageFilter<'_>,
    classify: F,
    cancel: &CancellationToken,
    dropped: &mut Vec<DroppedScene>,
) -> WaterResult<(usize, Vec<ClassifiedScene>)>
where
    F: Fn(&Scene) -> WaterResult<ClassifiedScene> + Sync + Send,
{
    let outcomes = executor.map(scenes, |scene| {
        prepare_scene(scene, aoi, coverage, &classify, cancel)
    });

    let mut retained = 0;
    let mut classified = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome? {
            Prepared::Retained(scene) => {
                retained += 1;
                classified.push(scene);
            }
            Prepared::BelowCoverage => {}
            Prepared::Dropped(d) => dropped.push(d),
            Prepared::Unclassified(d) => {
                retained += 1;
                dropped.push(d);
            }
        }
    }
    Ok((retained, classified))
}

enum Measured {
    Recorded {
        record: AreaRecord,
        resource_limited: bool,
    },
    Dropped(DroppedScene),
}

/// Stages 3 and 4 for one optical scene
fn measure_scene(
    optical: &ClassifiedScene,
    radar: &RadarIndex<'_>,
    integrator: &AreaIntegrator<'_>,
    aoi: &Aoi,
    cancel: &CancellationToken,
) -> WaterResult<Measured> {
    cancel.check()?;
    let fused = match fuse(optical, radar) {
        Ok(fused) => fused,
        Err(e) => {
            return drop_scene(optical.id(), SensorKind::Optical, Stage::Fusion, e)
                .map(Measured::Dropped)
        }
    };
    match integrator.integrate_scene(&fused, aoi, cancel) {
        Ok((record, limit)) => Ok(Measured::Recorded {
            record,
            resource_limited: limit.is_some(),
        }),
        Err(e) => drop_scene(optical.id(), SensorKind::Optical, Stage::Integration, e)
            .map(Measured::Dropped),
    }
}

/// Run the full pipeline over `aoi` for acquisitions in `date_range`.
///
/// Only misconfiguration, an unreachable optical catalog and cancellation are
/// fatal; every other failure is isolated to its scene and reported in the
/// summary.
pub fn run(
    aoi: &Aoi,
    date_range: &DateRange,
    config: &PipelineConfig,
    collaborators: &Collaborators<'_>,
    cancel: &CancellationToken,
) -> WaterResult<PipelineOutput> {
    config.validate()?;
    cancel.check()?;
    log::info!(
        "Starting water extent run over {:.3} km² from {} to {}",
        aoi.area_km2(),
        date_range.start(),
        date_range.end()
    );

    let executor = Executor::new(config.workers)?;
    let mut summary = RunSummary::default();

    // Catalog queries
    let optical_query = config.optical_query(aoi, date_range);
    let optical_scenes = with_retry(&config.retry, cancel, "optical catalog query", || {
        collaborators.catalog.query(&optical_query)
    })?;

    let radar_query = config.radar_query(aoi, date_range);
    let radar_scenes = match with_retry(&config.retry, cancel, "radar catalog query", || {
        collaborators.catalog.query(&radar_query)
    }) {
        Ok(scenes) => scenes,
        Err(WaterError::Cancelled) => return Err(WaterError::Cancelled),
        Err(e) => {
            log::warn!("Radar catalog unavailable ({}), continuing without radar fallback", e);
            summary.radar_query_failed = true;
            Vec::new()
        }
    };
    summary.optical_found = optical_scenes.len();
    summary.radar_found = radar_scenes.len();
    log::info!(
        "Catalog returned {} optical and {} radar scenes",
        summary.optical_found,
        summary.radar_found
    );

    // Coverage filtering and classification, per sensor
    let coverage = CoverageFilter::new(config.coverage.clone(), collaborators.geometry);
    let optical_classifier = OpticalClassifier::with_params(config.optical.clone());
    let radar_classifier = RadarClassifier::with_params(config.radar.clone());

    let (optical_retained, optical) = prepare_track(
        &executor,
        &optical_scenes,
        aoi,
        &coverage,
        |scene| optical_classifier.classify(scene),
        cancel,
        &mut summary.dropped,
    )?;
    let (radar_retained, radar) = prepare_track(
        &executor,
        &radar_scenes,
        aoi,
        &coverage,
        |scene| radar_classifier.classify(scene),
        cancel,
        &mut summary.dropped,
    )?;
    summary.optical_retained = optical_retained;
    summary.radar_retained = radar_retained;
    log::info!(
        "Coverage >= {}%: {} optical and {} radar scenes retained",
        config.coverage.threshold_percent,
        optical_retained,
        radar_retained
    );

    // Fusion and area integration
    let radar_index = RadarIndex::new(&radar);
    let integrator = AreaIntegrator::new(
        collaborators.reducer,
        config.reduce.clone(),
        config.retry.clone(),
    );
    let measured = executor.map(&optical, |scene| {
        measure_scene(scene, &radar_index, &integrator, aoi, cancel)
    });

    // Every scene is measured before aggregation starts
    let mut records = Vec::with_capacity(measured.len());
    for outcome in measured {
        match outcome? {
            Measured::Recorded {
                record,
                resource_limited,
            } => {
                if record.radar_scene_id.is_some() {
                    summary.fused_with_radar += 1;
                } else {
                    summary.fused_without_radar += 1;
                }
                if resource_limited {
                    summary.resource_limited.push(record.scene_id.clone());
                }
                records.push(record);
            }
            Measured::Dropped(d) => summary.dropped.push(d),
        }
    }

    sort_by_date(&mut records);
    let yearly = aggregate(&records);
    let series = series_stats(&records);

    log::info!(
        "Run complete: {} records ({} missing), {} fused with radar, {} dropped",
        records.len(),
        records.iter().filter(|r| r.is_missing()).count(),
        summary.fused_with_radar,
        summary.dropped.len()
    );

    Ok(PipelineOutput {
        records,
        yearly,
        series,
        summary,
    })
}
