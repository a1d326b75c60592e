use crate::geometry::Polygon;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Pixel value type for every raster band
pub type Pixel = f32;

/// Sensor that produced a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    /// Multispectral optical (Sentinel-2 surface reflectance)
    Optical,
    /// Synthetic aperture radar (Sentinel-1 GRD)
    Radar,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Optical => write!(f, "optical"),
            SensorKind::Radar => write!(f, "radar"),
        }
    }
}

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

/// Orbit direction at acquisition time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitPass {
    Ascending,
    Descending,
}

/// North-up geospatial transformation of a pixel grid (planar CRS, metres)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub top_left_y: f64,
    /// Negative for north-up grids
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Square north-up grid anchored at its top-left corner
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            top_left_y,
            pixel_height: -pixel_size,
        }
    }

    /// Ground area of one pixel in square metres
    pub fn pixel_area_m2(&self) -> f64 {
        (self.pixel_width * self.pixel_height).abs()
    }

    /// Map coordinates of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Pixel containing a map coordinate, if it falls inside a grid of `shape`
    pub fn pixel_at(&self, x: f64, y: f64, shape: (usize, usize)) -> Option<(usize, usize)> {
        if self.pixel_width == 0.0 || self.pixel_height == 0.0 {
            return None;
        }
        let col = ((x - self.top_left_x) / self.pixel_width).floor();
        let row = ((y - self.top_left_y) / self.pixel_height).floor();
        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        if row < shape.0 && col < shape.1 {
            Some((row, col))
        } else {
            None
        }
    }
}

/// A raster band: pixel values plus a per-pixel validity mask.
///
/// Values at invalid pixels carry no meaning; every consumer must check the mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    data: Array2<Pixel>,
    valid: Array2<bool>,
}

impl Band {
    /// Create a band from values and an explicit validity mask
    pub fn new(data: Array2<Pixel>, valid: Array2<bool>) -> WaterResult<Self> {
        if data.dim() != valid.dim() {
            return Err(WaterError::InvalidFormat(format!(
                "Band data {:?} and mask {:?} have different shapes",
                data.dim(),
                valid.dim()
            )));
        }
        Ok(Self { data, valid })
    }

    /// Create a band whose non-finite values are treated as masked
    pub fn from_data(data: Array2<Pixel>) -> Self {
        let valid = data.mapv(|v| v.is_finite());
        Self { data, valid }
    }

    /// Fully valid band holding the same value everywhere
    pub fn constant(shape: (usize, usize), value: Pixel) -> Self {
        Self {
            data: Array2::from_elem(shape, value),
            valid: Array2::from_elem(shape, true),
        }
    }

    /// Band with no valid pixel
    pub fn masked(shape: (usize, usize)) -> Self {
        Self {
            data: Array2::zeros(shape),
            valid: Array2::from_elem(shape, false),
        }
    }

    pub fn data(&self) -> &Array2<Pixel> {
        &self.data
    }

    pub fn valid(&self) -> &Array2<bool> {
        &self.valid
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Value at a pixel, `None` when masked or out of range
    pub fn get(&self, row: usize, col: usize) -> Option<Pixel> {
        match self.valid.get((row, col)) {
            Some(true) => self.data.get((row, col)).copied(),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    /// Values with masked pixels replaced by NaN
    pub fn to_nan_filled(&self) -> Array2<Pixel> {
        Zip::from(&self.data)
            .and(&self.valid)
            .map_collect(|&v, &ok| if ok { v } else { Pixel::NAN })
    }
}

/// Typed per-scene metadata, validated at creation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    /// Scene-wide cloudy pixel percentage (optical only)
    pub cloudy_pixel_percentage: Option<f32>,
    /// Instrument mode (radar only)
    pub instrument_mode: Option<AcquisitionMode>,
    /// Polarisations carried by the product (radar only)
    pub polarizations: Vec<Polarization>,
    /// Orbit direction (radar only)
    pub orbit_pass: Option<OrbitPass>,
    /// Fraction of the AOI covered by the footprint, set by the coverage filter
    pub coverage_percentage: Option<f64>,
}

impl SceneMetadata {
    /// Metadata for an optical acquisition
    pub fn optical(cloudy_pixel_percentage: f32) -> Self {
        Self {
            cloudy_pixel_percentage: Some(cloudy_pixel_percentage),
            ..Self::default()
        }
    }

    /// Metadata for a radar acquisition
    pub fn radar(
        instrument_mode: AcquisitionMode,
        polarizations: Vec<Polarization>,
        orbit_pass: OrbitPass,
    ) -> Self {
        Self {
            instrument_mode: Some(instrument_mode),
            polarizations,
            orbit_pass: Some(orbit_pass),
            ..Self::default()
        }
    }

    /// Check that every percentage lies in [0, 100]
    pub fn validate(&self) -> WaterResult<()> {
        if let Some(cloud) = self.cloudy_pixel_percentage {
            if !(0.0..=100.0).contains(&cloud) {
                return Err(WaterError::Metadata(format!(
                    "Cloudy pixel percentage {} outside [0, 100]",
                    cloud
                )));
            }
        }
        if let Some(coverage) = self.coverage_percentage {
            if !(0.0..=100.0).contains(&coverage) {
                return Err(WaterError::Metadata(format!(
                    "Coverage percentage {} outside [0, 100]",
                    coverage
                )));
            }
        }
        Ok(())
    }
}

/// One satellite acquisition.
///
/// Scenes are immutable: deriving a band or annotating metadata returns a new
/// scene that shares the untouched bands with its parent.
#[derive(Debug, Clone)]
pub struct Scene {
    id: String,
    sensor: SensorKind,
    acquired: DateTime<Utc>,
    footprint: Polygon,
    grid: GeoTransform,
    shape: (usize, usize),
    bands: HashMap<String, Arc<Band>>,
    metadata: SceneMetadata,
}

impl Scene {
    pub fn new(
        id: impl Into<String>,
        sensor: SensorKind,
        acquired: DateTime<Utc>,
        footprint: Polygon,
        grid: GeoTransform,
        shape: (usize, usize),
        metadata: SceneMetadata,
    ) -> WaterResult<Self> {
        metadata.validate()?;
        Ok(Self {
            id: id.into(),
            sensor,
            acquired,
            footprint,
            grid,
            shape,
            bands: HashMap::new(),
            metadata,
        })
    }

    /// New scene with `band` added (or replaced) under `name`
    pub fn with_band(&self, name: impl Into<String>, band: Band) -> WaterResult<Self> {
        let name = name.into();
        if band.dim() != self.shape {
            return Err(WaterError::InvalidFormat(format!(
                "Band '{}' has shape {:?}, scene {} is {:?}",
                name,
                band.dim(),
                self.id,
                self.shape
            )));
        }
        let mut scene = self.clone();
        scene.bands.insert(name, Arc::new(band));
        Ok(scene)
    }

    /// New scene carrying `metadata`
    pub fn with_metadata(&self, metadata: SceneMetadata) -> WaterResult<Self> {
        metadata.validate()?;
        let mut scene = self.clone();
        scene.metadata = metadata;
        Ok(scene)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sensor(&self) -> SensorKind {
        self.sensor
    }

    pub fn acquired(&self) -> DateTime<Utc> {
        self.acquired
    }

    pub fn footprint(&self) -> &Polygon {
        &self.footprint
    }

    pub fn grid(&self) -> &GeoTransform {
        &self.grid
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn metadata(&self) -> &SceneMetadata {
        &self.metadata
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.get(name).map(|b| b.as_ref())
    }

    /// Band lookup that fails with a processing error when absent
    pub fn require_band(&self, name: &str) -> WaterResult<&Band> {
        self.band(name).ok_or_else(|| {
            WaterError::Processing(format!("Scene {} has no band '{}'", self.id, name))
        })
    }

    pub fn band_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bands.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// A scene carrying a named water-classification band
#[derive(Debug, Clone)]
pub struct ClassifiedScene {
    scene: Scene,
    band: String,
}

impl ClassifiedScene {
    pub fn new(scene: Scene, band: impl Into<String>) -> WaterResult<Self> {
        let band = band.into();
        scene.require_band(&band)?;
        Ok(Self { scene, band })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn id(&self) -> &str {
        self.scene.id()
    }

    pub fn acquired(&self) -> DateTime<Utc> {
        self.scene.acquired()
    }

    pub fn band_name(&self) -> &str {
        &self.band
    }

    pub fn classification(&self) -> &Band {
        // Presence checked in `new`, bands are never removed
        &*self.scene.bands[&self.band]
    }
}

/// Optical scene whose combined water band has been fused with radar
#[derive(Debug, Clone)]
pub struct FusedScene {
    classified: ClassifiedScene,
    radar_scene_id: Option<String>,
}

impl FusedScene {
    pub fn new(classified: ClassifiedScene, radar_scene_id: Option<String>) -> Self {
        Self {
            classified,
            radar_scene_id,
        }
    }

    pub fn scene(&self) -> &Scene {
        self.classified.scene()
    }

    pub fn id(&self) -> &str {
        self.classified.id()
    }

    pub fn acquired(&self) -> DateTime<Utc> {
        self.classified.acquired()
    }

    pub fn combined(&self) -> &Band {
        self.classified.classification()
    }

    /// Radar scene that supplied fallback pixels, `None` for the no-water fallback
    pub fn radar_scene_id(&self) -> Option<&str> {
        self.radar_scene_id.as_deref()
    }
}

/// Water area measured on one optical acquisition date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaRecord {
    pub scene_id: String,
    pub date: NaiveDate,
    pub year: i32,
    /// Water area in km²; `None` means no data, never zero water
    pub water_area_km2: Option<f64>,
    /// Radar scene paired during fusion, if any
    pub radar_scene_id: Option<String>,
}

impl AreaRecord {
    pub fn new(
        scene_id: impl Into<String>,
        acquired: DateTime<Utc>,
        water_area_km2: Option<f64>,
        radar_scene_id: Option<String>,
    ) -> Self {
        Self {
            scene_id: scene_id.into(),
            date: acquired.date_naive(),
            year: acquired.year(),
            water_area_km2,
            radar_scene_id,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.water_area_km2.is_none()
    }
}

/// Water-area statistics for one calendar year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyStat {
    pub year: i32,
    /// Number of non-missing records in the year
    pub observations: usize,
    pub mean_water_km2: f64,
    /// Mean of the records strictly below the yearly mean
    pub below_avg_mean_km2: Option<f64>,
    /// Mean of the records strictly above the yearly mean
    pub above_avg_mean_km2: Option<f64>,
}

/// Half-open acquisition window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> WaterResult<Self> {
        if start >= end {
            return Err(WaterError::Configuration(format!(
                "Empty date range: {} is not before {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Window from midnight of `start` up to midnight of `end`
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> WaterResult<Self> {
        Self::new(
            start.and_hms_opt(0, 0, 0).map(|d| d.and_utc()).ok_or_else(|| {
                WaterError::Configuration(format!("Invalid start date {}", start))
            })?,
            end.and_hms_opt(0, 0, 0).map(|d| d.and_utc()).ok_or_else(|| {
                WaterError::Configuration(format!("Invalid end date {}", end))
            })?,
        )
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

/// Error types for water extent processing
#[derive(Debug, thiserror::Error)]
pub enum WaterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Pixel budget exceeded: {required} pixels required, budget is {budget}")]
    ResourceLimit { required: u64, budget: u64 },

    #[error("Transient service error: {0}")]
    TransientService(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl WaterError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, WaterError::TransientService(_))
    }
}

/// Result type for water extent operations
pub type WaterResult<T> = Result<T, WaterError>;
