use crate::geometry::Aoi;
use crate::io::reducer::{ReduceParams, ZonalAreaReducer};
use crate::io::retry::{with_retry, CancellationToken, RetryPolicy};
use crate::types::{AreaRecord, Band, FusedScene, Pixel, WaterError, WaterResult};
use ndarray::Zip;

/// Per-pixel water area in km²: `pixel_area_km2` where `classification > 0`,
/// 0 elsewhere. Masked pixels stay masked.
pub fn water_area_band(classification: &Band, pixel_area_km2: f64) -> WaterResult<Band> {
    let area = pixel_area_km2 as Pixel;
    let zip = Zip::from(classification.data()).and(classification.valid());
    let kernel = |&v: &Pixel, &ok: &bool| if ok && v > 0.0 { area } else { 0.0 };

    #[cfg(feature = "parallel")]
    let data = zip.par_map_collect(kernel);
    #[cfg(not(feature = "parallel"))]
    let data = zip.map_collect(kernel);
    Band::new(data, classification.valid().clone())
}

/// Check a reducer result against the AOI and express it as km² of water
fn checked_area(scene_id: &str, area_km2: Option<f64>, aoi: &Aoi) -> WaterResult<Option<f64>> {
    match area_km2 {
        None => Ok(None),
        Some(area) if !area.is_finite() || area < 0.0 => Err(WaterError::Processing(format!(
            "Reducer returned invalid water area {} for scene {}",
            area, scene_id
        ))),
        Some(area) if area > aoi.area_km2() => {
            // Sampling at the reduction scale can overshoot ragged AOI edges
            log::debug!(
                "Clamping water area {:.4} km² to AOI area {:.4} km² for {}",
                area,
                aoi.area_km2(),
                scene_id
            );
            Ok(Some(aoi.area_km2()))
        }
        Some(area) => Ok(Some(area)),
    }
}

/// Integrate the fused water band of `fused` over `aoi`.
///
/// A reducer without data yields a record with missing area. Resource-limit
/// and service errors are returned to the caller.
pub fn integrate(
    fused: &FusedScene,
    aoi: &Aoi,
    reducer: &dyn ZonalAreaReducer,
    params: &ReduceParams,
) -> WaterResult<AreaRecord> {
    let area_band = water_area_band(fused.combined(), params.pixel_area_km2())?;
    let area = reducer.reduce_sum(&area_band, fused.scene().grid(), aoi, params)?;
    let area = checked_area(fused.id(), area, aoi)?;

    match area {
        Some(a) => log::debug!("Scene {}: {:.4} km² of water", fused.id(), a),
        None => log::debug!("Scene {}: no valid pixels over the AOI", fused.id()),
    }

    Ok(AreaRecord::new(
        fused.id(),
        fused.acquired(),
        area,
        fused.radar_scene_id().map(str::to_string),
    ))
}

/// Area integration with retries around the reducer
pub struct AreaIntegrator<'a> {
    reducer: &'a dyn ZonalAreaReducer,
    params: ReduceParams,
    retry: RetryPolicy,
}

impl<'a> AreaIntegrator<'a> {
    pub fn new(reducer: &'a dyn ZonalAreaReducer, params: ReduceParams, retry: RetryPolicy) -> Self {
        Self {
            reducer,
            params,
            retry,
        }
    }

    /// Integrate one scene, retrying transient reducer failures.
    ///
    /// A pixel-budget overrun is not fatal: the record is returned with its
    /// area missing, alongside the error that caused it.
    pub fn integrate_scene(
        &self,
        fused: &FusedScene,
        aoi: &Aoi,
        cancel: &CancellationToken,
    ) -> WaterResult<(AreaRecord, Option<WaterError>)> {
        let label = format!("reduce {}", fused.id());
        let result = with_retry(&self.retry, cancel, &label, || {
            integrate(fused, aoi, self.reducer, &self.params)
        });

        match result {
            Ok(record) => Ok((record, None)),
            Err(e @ WaterError::ResourceLimit { .. }) => {
                log::warn!("Scene {}: {}; recording area as missing", fused.id(), e);
                let record = AreaRecord::new(
                    fused.id(),
                    fused.acquired(),
                    None,
                    fused.radar_scene_id().map(str::to_string),
                );
                Ok((record, Some(e)))
            }
            Err(e) => Err(e),
        }
    }
}
