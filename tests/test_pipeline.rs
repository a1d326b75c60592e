use approx::assert_relative_eq;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ndarray::Array2;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use waterfuse::core::{run, Collaborators, PipelineConfig, Stage};
use waterfuse::geometry::{Aoi, PlanarGeometry, Polygon};
use waterfuse::io::{
    CancellationToken, CatalogQuery, GridAreaReducer, ImageryCatalog, InMemoryCatalog, Product,
    ReduceParams, RetryPolicy, ZonalAreaReducer,
};
use waterfuse::types::{
    AcquisitionMode, Band, DateRange, GeoTransform, OrbitPass, Polarization, Scene, SceneMetadata,
    SensorKind, WaterError, WaterResult,
};

const SIZE: usize = 100;
const PIXEL: f64 = 10.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn aoi() -> Aoi {
    Aoi::from_polygon(Polygon::rectangle(0.0, 0.0, 1000.0, 1000.0).unwrap()).unwrap()
}

fn grid() -> GeoTransform {
    GeoTransform::north_up(0.0, 1000.0, PIXEL)
}

fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

fn date_range() -> DateRange {
    DateRange::from_dates(
        NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    )
    .unwrap()
}

/// Optical scene whose green/NIR bands come from a per-pixel NDWI sign:
/// `Some(true)` water, `Some(false)` land, `None` cloud-masked
fn optical_scene(
    id: &str,
    acquired: DateTime<Utc>,
    footprint: Polygon,
    cloud: f32,
    pixel: impl Fn(usize, usize) -> Option<bool>,
) -> Scene {
    let green = Array2::from_shape_fn((SIZE, SIZE), |(r, c)| match pixel(r, c) {
        Some(true) => 0.3,
        Some(false) => 0.1,
        None => f32::NAN,
    });
    let nir = Array2::from_shape_fn((SIZE, SIZE), |(r, c)| match pixel(r, c) {
        Some(true) => 0.1,
        Some(false) => 0.3,
        None => f32::NAN,
    });

    Scene::new(
        id,
        SensorKind::Optical,
        acquired,
        footprint,
        grid(),
        (SIZE, SIZE),
        SceneMetadata::optical(cloud),
    )
    .unwrap()
    .with_band("B3", Band::from_data(green))
    .unwrap()
    .with_band("B8", Band::from_data(nir))
    .unwrap()
}

/// Radar scene that classifies as water everywhere (VV/VH = 1 < 2)
fn radar_water_scene(id: &str, acquired: DateTime<Utc>) -> Scene {
    Scene::new(
        id,
        SensorKind::Radar,
        acquired,
        Polygon::rectangle(-500.0, -500.0, 1500.0, 1500.0).unwrap(),
        grid(),
        (SIZE, SIZE),
        SceneMetadata::radar(
            AcquisitionMode::IW,
            vec![Polarization::VV, Polarization::VH],
            OrbitPass::Ascending,
        ),
    )
    .unwrap()
    .with_band("VV", Band::constant((SIZE, SIZE), 0.1))
    .unwrap()
    .with_band("VH", Band::constant((SIZE, SIZE), 0.1))
    .unwrap()
}

fn full_footprint() -> Polygon {
    Polygon::rectangle(0.0, 0.0, 1000.0, 1000.0).unwrap()
}

/// Two years of acquisitions over the test lake:
///
/// - `S2_A` 2022-06-01: left half water, no radar that day
/// - `S2_B` 2022-06-11: fully cloud-masked, radar `S1_R` the same afternoon
/// - `S2_C` 2023-03-01: top 20 rows water, the rest masked, no radar
/// - `S2_HALF` covers half of the AOI and is dropped by coverage
/// - `S2_CLOUDY` exceeds the cloud threshold and is never returned
fn scenario_catalog() -> InMemoryCatalog {
    InMemoryCatalog::from_scenes(vec![
        optical_scene("S2_A", at(2022, 6, 1, 10), full_footprint(), 5.0, |_, c| {
            Some(c < 50)
        }),
        optical_scene("S2_B", at(2022, 6, 11, 10), full_footprint(), 15.0, |_, _| {
            None
        }),
        optical_scene("S2_C", at(2023, 3, 1, 10), full_footprint(), 1.0, |r, _| {
            if r < 20 {
                Some(true)
            } else {
                None
            }
        }),
        optical_scene(
            "S2_HALF",
            at(2022, 7, 1, 10),
            Polygon::rectangle(0.0, 0.0, 500.0, 1000.0).unwrap(),
            2.0,
            |_, _| Some(true),
        ),
        optical_scene("S2_CLOUDY", at(2022, 8, 1, 10), full_footprint(), 60.0, |_, _| {
            Some(true)
        }),
        radar_water_scene("S1_R", at(2022, 6, 11, 17)),
    ])
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
        },
        ..PipelineConfig::default()
    }
}

fn collaborators<'a>(
    catalog: &'a dyn ImageryCatalog,
    reducer: &'a dyn ZonalAreaReducer,
    geometry: &'a PlanarGeometry,
) -> Collaborators<'a> {
    Collaborators {
        catalog,
        reducer,
        geometry,
    }
}

#[test]
fn test_end_to_end_fused_series() {
    init_logging();
    let catalog = scenario_catalog();
    let reducer = GridAreaReducer::new();
    let geometry = PlanarGeometry::default();

    let output = run(
        &aoi(),
        &date_range(),
        &fast_config(),
        &collaborators(&catalog, &reducer, &geometry),
        &CancellationToken::new(),
    )
    .unwrap();

    for record in &output.records {
        println!(
            "{} {} {:?} radar={:?}",
            record.date, record.scene_id, record.water_area_km2, record.radar_scene_id
        );
    }

    let summary = &output.summary;
    assert_eq!(summary.optical_found, 4);
    assert_eq!(summary.optical_retained, 3);
    assert_eq!(summary.radar_found, 1);
    assert_eq!(summary.radar_retained, 1);
    assert!(!summary.radar_query_failed);
    assert_eq!(summary.fused_with_radar, 1);
    assert_eq!(summary.fused_without_radar, 2);
    assert!(summary.dropped.is_empty());
    assert!(summary.resource_limited.is_empty());

    let ids: Vec<&str> = output.records.iter().map(|r| r.scene_id.as_str()).collect();
    assert_eq!(ids, vec!["S2_A", "S2_B", "S2_C"]);

    // Clear scene: optical classification only
    let a = &output.records[0];
    assert_relative_eq!(a.water_area_km2.unwrap(), 0.5, epsilon = 1e-5);
    assert!(a.radar_scene_id.is_none());

    // Cloud-masked scene: every pixel comes from the same-day radar scene
    let b = &output.records[1];
    assert_relative_eq!(b.water_area_km2.unwrap(), 1.0, epsilon = 1e-5);
    assert_eq!(b.radar_scene_id.as_deref(), Some("S1_R"));

    // Masked pixels without radar count as no water
    let c = &output.records[2];
    assert_relative_eq!(c.water_area_km2.unwrap(), 0.2, epsilon = 1e-5);
    assert_eq!(c.year, 2023);

    assert_eq!(output.yearly.len(), 2);
    let y2022 = &output.yearly[0];
    assert_eq!(y2022.year, 2022);
    assert_eq!(y2022.observations, 2);
    assert_relative_eq!(y2022.mean_water_km2, 0.75, epsilon = 1e-5);
    assert_relative_eq!(y2022.below_avg_mean_km2.unwrap(), 0.5, epsilon = 1e-5);
    assert_relative_eq!(y2022.above_avg_mean_km2.unwrap(), 1.0, epsilon = 1e-5);

    let y2023 = &output.yearly[1];
    assert_eq!(y2023.observations, 1);
    assert!(y2023.below_avg_mean_km2.is_none());
    assert!(y2023.above_avg_mean_km2.is_none());

    assert_eq!(output.series.valid_count, 3);
    assert_relative_eq!(output.series.max.unwrap(), 1.0, epsilon = 1e-5);
}

#[test]
fn test_worker_count_does_not_change_results() {
    init_logging();
    let catalog = scenario_catalog();
    let reducer = GridAreaReducer::new();
    let geometry = PlanarGeometry::default();
    let collaborators = collaborators(&catalog, &reducer, &geometry);

    let default_pool = run(
        &aoi(),
        &date_range(),
        &fast_config(),
        &collaborators,
        &CancellationToken::new(),
    )
    .unwrap();

    let mut config = fast_config();
    config.workers = Some(1);
    let single = run(
        &aoi(),
        &date_range(),
        &config,
        &collaborators,
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(default_pool.records, single.records);
    assert_eq!(default_pool.yearly, single.yearly);
    assert_eq!(default_pool.summary, single.summary);
}

#[test]
fn test_stricter_coverage_threshold_drops_more() {
    init_logging();
    let catalog = scenario_catalog();
    let reducer = GridAreaReducer::new();
    let geometry = PlanarGeometry::default();

    let mut config = fast_config();
    config.coverage.threshold_percent = 40.0;
    let output = run(
        &aoi(),
        &date_range(),
        &config,
        &collaborators(&catalog, &reducer, &geometry),
        &CancellationToken::new(),
    )
    .unwrap();

    // The half-footprint scene now passes
    assert_eq!(output.summary.optical_retained, 4);
    assert!(output.records.iter().any(|r| r.scene_id == "S2_HALF"));
}

/// Catalog that fails a fixed number of times before answering
struct FlakyCatalog {
    inner: InMemoryCatalog,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl ImageryCatalog for FlakyCatalog {
    fn query(&self, query: &CatalogQuery) -> WaterResult<Vec<Scene>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(WaterError::TransientService("catalog timed out".to_string()));
        }
        self.inner.query(query)
    }
}

#[test]
fn test_transient_catalog_failures_are_retried() {
    init_logging();
    let catalog = FlakyCatalog {
        inner: scenario_catalog(),
        failures_left: AtomicUsize::new(2),
        calls: AtomicUsize::new(0),
    };
    let reducer = GridAreaReducer::new();
    let geometry = PlanarGeometry::default();

    let output = run(
        &aoi(),
        &date_range(),
        &fast_config(),
        &collaborators(&catalog, &reducer, &geometry),
        &CancellationToken::new(),
    )
    .unwrap();

    // Two failed optical attempts, one successful optical and one radar query
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 4);
    assert_eq!(output.records.len(), 3);
}

#[test]
fn test_unreachable_optical_catalog_is_fatal() {
    init_logging();
    let catalog = FlakyCatalog {
        inner: scenario_catalog(),
        failures_left: AtomicUsize::new(usize::MAX),
        calls: AtomicUsize::new(0),
    };
    let reducer = GridAreaReducer::new();
    let geometry = PlanarGeometry::default();

    let result = run(
        &aoi(),
        &date_range(),
        &fast_config(),
        &collaborators(&catalog, &reducer, &geometry),
        &CancellationToken::new(),
    );

    assert!(matches!(result, Err(WaterError::TransientService(_))));
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 3);
}

/// Catalog whose radar collection is down
struct NoRadarCatalog(InMemoryCatalog);

impl ImageryCatalog for NoRadarCatalog {
    fn query(&self, query: &CatalogQuery) -> WaterResult<Vec<Scene>> {
        match query.product {
            Product::Sentinel1Grd => Err(WaterError::TransientService(
                "COPERNICUS/S1_GRD unavailable".to_string(),
            )),
            _ => self.0.query(query),
        }
    }
}

#[test]
fn test_radar_catalog_failure_degrades_to_optical_only() {
    init_logging();
    let catalog = NoRadarCatalog(scenario_catalog());
    let reducer = GridAreaReducer::new();
    let geometry = PlanarGeometry::default();

    let output = run(
        &aoi(),
        &date_range(),
        &fast_config(),
        &collaborators(&catalog, &reducer, &geometry),
        &CancellationToken::new(),
    )
    .unwrap();

    assert!(output.summary.radar_query_failed);
    assert_eq!(output.summary.radar_found, 0);
    assert_eq!(output.summary.fused_with_radar, 0);

    // The cloud-masked scene now measures zero water, not missing
    let b = output
        .records
        .iter()
        .find(|r| r.scene_id == "S2_B")
        .unwrap();
    assert_eq!(b.water_area_km2, Some(0.0));
    assert!(b.radar_scene_id.is_none());
}

#[test]
fn test_pixel_budget_overrun_records_missing_areas() {
    init_logging();
    let catalog = scenario_catalog();
    let reducer = GridAreaReducer::new();
    let geometry = PlanarGeometry::default();

    let mut config = fast_config();
    config.reduce = ReduceParams {
        max_pixels: 100,
        ..ReduceParams::default()
    };
    let output = run(
        &aoi(),
        &date_range(),
        &config,
        &collaborators(&catalog, &reducer, &geometry),
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(output.records.len(), 3);
    assert!(output.records.iter().all(|r| r.is_missing()));
    assert_eq!(output.summary.resource_limited, vec!["S2_A", "S2_B", "S2_C"]);
    assert!(output.yearly.is_empty());
    assert_eq!(output.series.total_count, 3);
    assert_eq!(output.series.valid_count, 0);
}

/// Reducer that never answers for one scene
struct BrokenForScene {
    inner: GridAreaReducer,
    broken_origin_x: f64,
}

impl ZonalAreaReducer for BrokenForScene {
    fn reduce_sum(
        &self,
        band: &Band,
        grid: &GeoTransform,
        aoi: &Aoi,
        params: &ReduceParams,
    ) -> WaterResult<Option<f64>> {
        if grid.top_left_x == self.broken_origin_x {
            return Err(WaterError::TransientService("reducer timed out".to_string()));
        }
        self.inner.reduce_sum(band, grid, aoi, params)
    }
}

#[test]
fn test_scene_failures_are_isolated() {
    init_logging();
    let mut catalog = scenario_catalog();
    // Same AOI coverage, but on a shifted grid the broken reducer refuses
    catalog.insert(
        Scene::new(
            "S2_SHIFTED",
            SensorKind::Optical,
            at(2023, 5, 1, 10),
            full_footprint(),
            GeoTransform::north_up(-10.0, 1010.0, PIXEL),
            (SIZE + 2, SIZE + 2),
            SceneMetadata::optical(3.0),
        )
        .unwrap()
        .with_band("B3", Band::constant((SIZE + 2, SIZE + 2), 0.3))
        .unwrap()
        .with_band("B8", Band::constant((SIZE + 2, SIZE + 2), 0.1))
        .unwrap(),
    );
    // Passes coverage but lacks the NIR band
    catalog.insert(
        Scene::new(
            "S2_NO_NIR",
            SensorKind::Optical,
            at(2023, 6, 1, 10),
            full_footprint(),
            grid(),
            (SIZE, SIZE),
            SceneMetadata::optical(3.0),
        )
        .unwrap()
        .with_band("B3", Band::constant((SIZE, SIZE), 0.3))
        .unwrap(),
    );

    let reducer = BrokenForScene {
        inner: GridAreaReducer::new(),
        broken_origin_x: -10.0,
    };
    let geometry = PlanarGeometry::default();

    let output = run(
        &aoi(),
        &date_range(),
        &fast_config(),
        &collaborators(&catalog, &reducer, &geometry),
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(output.records.len(), 3);
    assert_eq!(output.summary.optical_retained, 5);
    assert_eq!(output.summary.dropped.len(), 2);

    let no_nir = output
        .summary
        .dropped
        .iter()
        .find(|d| d.scene_id == "S2_NO_NIR")
        .unwrap();
    assert_eq!(no_nir.stage, Stage::Classification);
    assert_eq!(no_nir.sensor, SensorKind::Optical);

    let shifted = output
        .summary
        .dropped
        .iter()
        .find(|d| d.scene_id == "S2_SHIFTED")
        .unwrap();
    assert_eq!(shifted.stage, Stage::Integration);
}

/// Reducer that cancels the run the first time it is asked for anything
struct CancellingReducer {
    token: CancellationToken,
}

impl ZonalAreaReducer for CancellingReducer {
    fn reduce_sum(
        &self,
        _band: &Band,
        _grid: &GeoTransform,
        _aoi: &Aoi,
        _params: &ReduceParams,
    ) -> WaterResult<Option<f64>> {
        self.token.cancel();
        Err(WaterError::Cancelled)
    }
}

#[test]
fn test_cancellation_aborts_the_run() {
    init_logging();
    let catalog = scenario_catalog();
    let geometry = PlanarGeometry::default();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = run(
        &aoi(),
        &date_range(),
        &fast_config(),
        &collaborators(&catalog, &GridAreaReducer::new(), &geometry),
        &cancel,
    );
    assert!(matches!(result, Err(WaterError::Cancelled)));

    let token = CancellationToken::new();
    let reducer = CancellingReducer {
        token: token.clone(),
    };
    let result = run(
        &aoi(),
        &date_range(),
        &fast_config(),
        &collaborators(&catalog, &reducer, &geometry),
        &token,
    );
    assert!(matches!(result, Err(WaterError::Cancelled)));
}

#[test]
fn test_misconfiguration_is_rejected_before_any_query() {
    init_logging();
    let catalog = FlakyCatalog {
        inner: scenario_catalog(),
        failures_left: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
    };
    let reducer = GridAreaReducer::new();
    let geometry = PlanarGeometry::default();

    let mut config = fast_config();
    config.coverage.threshold_percent = 120.0;
    let result = run(
        &aoi(),
        &date_range(),
        &config,
        &collaborators(&catalog, &reducer, &geometry),
        &CancellationToken::new(),
    );
    assert!(matches!(result, Err(WaterError::Configuration(_))));
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 0);

    let day = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
    assert!(matches!(
        DateRange::from_dates(day, day),
        Err(WaterError::Configuration(_))
    ));
}

#[test]
fn test_empty_catalog_produces_empty_series() {
    init_logging();
    let catalog = InMemoryCatalog::new();
    let reducer = GridAreaReducer::new();
    let geometry = PlanarGeometry::default();

    let output = run(
        &aoi(),
        &date_range(),
        &fast_config(),
        &collaborators(&catalog, &reducer, &geometry),
        &CancellationToken::new(),
    )
    .unwrap();

    assert!(output.records.is_empty());
    assert!(output.yearly.is_empty());
    assert_eq!(output.summary.optical_found, 0);
    assert!(output.series.mean.is_none());
}
