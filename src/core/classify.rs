use crate::types::{Band, ClassifiedScene, Pixel, Scene, WaterError, WaterResult};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Name of the optical water index band
pub const NDWI_BAND: &str = "NDWI";

/// Name of the radar water classification band
pub const RADAR_WATER_BAND: &str = "Water";

/// Optical classifier parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalClassifierParams {
    /// Green band (Sentinel-2 B3)
    pub green_band: String,
    /// Near-infrared band (Sentinel-2 B8)
    pub nir_band: String,
}

impl Default for OpticalClassifierParams {
    fn default() -> Self {
        Self {
            green_band: "B3".to_string(),
            nir_band: "B8".to_string(),
        }
    }
}

/// Radar classifier parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarClassifierParams {
    /// Co-polarized band
    pub co_pol_band: String,
    /// Cross-polarized band
    pub cross_pol_band: String,
    /// Pixels with co/cross ratio strictly below this are water
    pub ratio_threshold: f32,
    /// Denominators with a smaller magnitude make the pixel unavailable
    pub min_denominator: f32,
}

impl Default for RadarClassifierParams {
    fn default() -> Self {
        Self {
            co_pol_band: "VV".to_string(),
            cross_pol_band: "VH".to_string(),
            ratio_threshold: 2.0,
            min_denominator: 1e-6,
        }
    }
}

impl RadarClassifierParams {
    pub fn validate(&self) -> WaterResult<()> {
        if !(self.ratio_threshold.is_finite() && self.ratio_threshold > 0.0) {
            return Err(WaterError::Configuration(format!(
                "Radar ratio threshold must be positive, got {}",
                self.ratio_threshold
            )));
        }
        if !(self.min_denominator.is_finite() && self.min_denominator >= 0.0) {
            return Err(WaterError::Configuration(format!(
                "Minimum denominator must be non-negative, got {}",
                self.min_denominator
            )));
        }
        Ok(())
    }
}

fn check_same_shape(a: &Band, b: &Band) -> WaterResult<()> {
    if a.dim() != b.dim() {
        return Err(WaterError::InvalidFormat(format!(
            "Band shapes differ: {:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(())
}

/// `(a - b) / (a + b)`, unavailable wherever either input is or the sum is zero
pub fn normalized_difference(a: &Band, b: &Band) -> WaterResult<Band> {
    check_same_shape(a, b)?;
    let shape = a.dim();
    let mut data = Array2::<Pixel>::zeros(shape);
    let mut valid = Array2::from_elem(shape, false);

    let kernel = |out: &mut Pixel, ok: &mut bool, &va: &Pixel, &a_ok: &bool, &vb: &Pixel, &b_ok: &bool| {
        let sum = va + vb;
        if a_ok && b_ok && sum != 0.0 {
            let index = (va - vb) / sum;
            if index.is_finite() {
                *out = index;
                *ok = true;
            }
        }
    };
    let zip = Zip::from(&mut data)
        .and(&mut valid)
        .and(a.data())
        .and(a.valid())
        .and(b.data())
        .and(b.valid());

    #[cfg(feature = "parallel")]
    zip.par_for_each(kernel);
    #[cfg(not(feature = "parallel"))]
    zip.for_each(kernel);

    Band::new(data, valid)
}

/// Water (1) where `co / cross < threshold`, land (0) otherwise.
///
/// Near-zero denominators and masked inputs stay unavailable.
pub fn polarization_ratio_water(
    co: &Band,
    cross: &Band,
    threshold: Pixel,
    min_denominator: Pixel,
) -> WaterResult<Band> {
    check_same_shape(co, cross)?;
    let shape = co.dim();
    let mut data = Array2::<Pixel>::zeros(shape);
    let mut valid = Array2::from_elem(shape, false);

    let kernel = |out: &mut Pixel,
                  ok: &mut bool,
                  &vco: &Pixel,
                  &co_ok: &bool,
                  &vcross: &Pixel,
                  &cross_ok: &bool| {
        if !(co_ok && cross_ok) || vcross.abs() <= min_denominator {
            return;
        }
        let ratio = vco / vcross;
        if ratio.is_finite() {
            *out = if ratio < threshold { 1.0 } else { 0.0 };
            *ok = true;
        }
    };
    let zip = Zip::from(&mut data)
        .and(&mut valid)
        .and(co.data())
        .and(co.valid())
        .and(cross.data())
        .and(cross.valid());

    #[cfg(feature = "parallel")]
    zip.par_for_each(kernel);
    #[cfg(not(feature = "parallel"))]
    zip.for_each(kernel);

    Band::new(data, valid)
}

/// NDWI classifier for optical scenes
#[derive(Debug, Clone, Default)]
pub struct OpticalClassifier {
    params: OpticalClassifierParams,
}

impl OpticalClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: OpticalClassifierParams) -> Self {
        Self { params }
    }

    /// Add the NDWI band to `scene`
    pub fn classify(&self, scene: &Scene) -> WaterResult<ClassifiedScene> {
        let green = scene.require_band(&self.params.green_band)?;
        let nir = scene.require_band(&self.params.nir_band)?;
        let ndwi = normalized_difference(green, nir)?;

        log::debug!(
            "NDWI for {}: {} of {} pixels valid",
            scene.id(),
            ndwi.valid_count(),
            ndwi.data().len()
        );

        ClassifiedScene::new(scene.with_band(NDWI_BAND, ndwi)?, NDWI_BAND)
    }
}

/// Polarization-ratio water classifier for radar scenes
#[derive(Debug, Clone, Default)]
pub struct RadarClassifier {
    params: RadarClassifierParams,
}

impl RadarClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: RadarClassifierParams) -> Self {
        Self { params }
    }

    /// Add the binary water band to `scene`
    pub fn classify(&self, scene: &Scene) -> WaterResult<ClassifiedScene> {
        let co = scene.require_band(&self.params.co_pol_band)?;
        let cross = scene.require_band(&self.params.cross_pol_band)?;
        let water = polarization_ratio_water(
            co,
            cross,
            self.params.ratio_threshold,
            self.params.min_denominator,
        )?;

        log::debug!(
            "Radar water for {}: {} of {} pixels valid",
            scene.id(),
            water.valid_count(),
            water.data().len()
        );

        ClassifiedScene::new(scene.with_band(RADAR_WATER_BAND, water)?, RADAR_WATER_BAND)
    }
}
