use crate::types::{Band, ClassifiedScene, FusedScene, Pixel, Scene, WaterError, WaterResult};
use chrono::{DateTime, Duration, Utc};
use ndarray::{Array2, Zip};

/// Name of the fused optical/radar water band
pub const COMBINED_WATER_BAND: &str = "CombinedWater";

/// Radar scenes sorted by acquisition time for same-day lookup
#[derive(Debug)]
pub struct RadarIndex<'a> {
    entries: Vec<&'a ClassifiedScene>,
}

impl<'a> RadarIndex<'a> {
    pub fn new(radar: &'a [ClassifiedScene]) -> Self {
        let mut entries: Vec<&ClassifiedScene> = radar.iter().collect();
        entries.sort_by(|a, b| {
            a.acquired()
                .cmp(&b.acquired())
                .then_with(|| a.id().cmp(b.id()))
        });
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First radar scene acquired in `[t, t + 1 day)`
    pub fn same_day(&self, t: DateTime<Utc>) -> Option<&'a ClassifiedScene> {
        let window_end = t + Duration::days(1);
        let first = self.entries.partition_point(|s| s.acquired() < t);
        self.entries
            .get(first)
            .copied()
            .filter(|s| s.acquired() < window_end)
    }
}

/// Fully valid band of fallback values on the optical scene's grid.
///
/// Without a radar match every pixel is 0 (no water). With one, each optical
/// pixel centre takes the nearest radar value; unavailable radar pixels and
/// pixels outside the radar grid fall back to 0.
pub fn fallback_band(optical: &Scene, radar: Option<&ClassifiedScene>) -> Band {
    let shape = optical.shape();
    let radar = match radar {
        Some(radar) => radar,
        None => return Band::constant(shape, 0.0),
    };

    let water = radar.classification();
    let data: Array2<Pixel> = if radar.scene().grid() == optical.grid() && water.dim() == shape {
        Zip::from(water.data())
            .and(water.valid())
            .map_collect(|&v, &ok| if ok && v.is_finite() { v } else { 0.0 })
    } else {
        let radar_grid = radar.scene().grid();
        Array2::from_shape_fn(shape, |(row, col)| {
            let (x, y) = optical.grid().pixel_center(row, col);
            radar_grid
                .pixel_at(x, y, water.dim())
                .and_then(|(r, c)| water.get(r, c))
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
        })
    };

    Band::from_data(data)
}

/// Per-pixel substitution: optical value where valid, fallback elsewhere
pub fn fuse_pixels(optical: &Band, fallback: &Band) -> WaterResult<Band> {
    if optical.dim() != fallback.dim() {
        return Err(WaterError::InvalidFormat(format!(
            "Optical band {:?} and fallback band {:?} differ in shape",
            optical.dim(),
            fallback.dim()
        )));
    }

    let data = Zip::from(optical.data())
        .and(optical.valid())
        .and(fallback.data())
        .map_collect(|&o, &ok, &f| {
            if ok && o.is_finite() {
                o
            } else if f.is_finite() {
                f
            } else {
                0.0
            }
        });

    Ok(Band::from_data(data))
}

/// Fuse one optical scene with its same-day radar scene, if any
pub fn fuse(optical: &ClassifiedScene, radar: &RadarIndex<'_>) -> WaterResult<FusedScene> {
    let matched = radar.same_day(optical.acquired());
    match matched {
        Some(r) => log::debug!("Pairing optical {} with radar {}", optical.id(), r.id()),
        None => log::debug!(
            "No same-day radar for optical {}, using no-water fallback",
            optical.id()
        ),
    }

    let fallback = fallback_band(optical.scene(), matched);
    let combined = fuse_pixels(optical.classification(), &fallback)?;
    let scene = optical.scene().with_band(COMBINED_WATER_BAND, combined)?;

    Ok(FusedScene::new(
        ClassifiedScene::new(scene, COMBINED_WATER_BAND)?,
        matched.map(|r| r.id().to_string()),
    ))
}
