use crate::geometry::{Aoi, Point};
use crate::types::{Band, GeoTransform, WaterError, WaterResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of a zonal sum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceParams {
    /// Ground resolution the sum is evaluated at (metres)
    pub scale_m: f64,
    /// Upper bound on the number of pixels the reducer may touch
    pub max_pixels: u64,
    /// Per-request timeout the reducer client should apply
    pub timeout: Duration,
}

impl Default for ReduceParams {
    fn default() -> Self {
        Self {
            scale_m: 10.0,                // Sentinel-2 visible/NIR resolution
            max_pixels: 10_000_000_000_000, // 1e13
            timeout: Duration::from_secs(120),
        }
    }
}

impl ReduceParams {
    pub fn validate(&self) -> WaterResult<()> {
        if !(self.scale_m.is_finite() && self.scale_m > 0.0) {
            return Err(WaterError::Configuration(format!(
                "Reduction scale must be positive, got {}",
                self.scale_m
            )));
        }
        if self.max_pixels == 0 {
            return Err(WaterError::Configuration(
                "Pixel budget must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Area of one pixel at the reduction scale, in km²
    pub fn pixel_area_km2(&self) -> f64 {
        self.scale_m * self.scale_m / 1e6
    }
}

/// Zonal sum of a band over the AOI
pub trait ZonalAreaReducer: Send + Sync {
    /// Sum of `band` over `aoi`, sampled at `params.scale_m`.
    ///
    /// Returns `Ok(None)` when no valid pixel falls inside the AOI and
    /// `Err(ResourceLimit)` when the request needs more than
    /// `params.max_pixels` pixels. Must be deterministic.
    fn reduce_sum(
        &self,
        band: &Band,
        grid: &GeoTransform,
        aoi: &Aoi,
        params: &ReduceParams,
    ) -> WaterResult<Option<f64>>;
}

/// Reducer that samples the band at the centres of a `scale`-metre grid laid
/// over the AOI bounding box (nearest neighbour).
#[derive(Debug, Clone, Default)]
pub struct GridAreaReducer;

impl GridAreaReducer {
    pub fn new() -> Self {
        Self
    }

    /// Number of sampling pixels a reduction over `aoi` needs
    pub fn required_pixels(aoi: &Aoi, scale_m: f64) -> u64 {
        let bounds = aoi.bounds();
        let cols = (bounds.width() / scale_m).ceil().max(1.0);
        let rows = (bounds.height() / scale_m).ceil().max(1.0);
        let total = cols * rows;
        if total >= u64::MAX as f64 {
            u64::MAX
        } else {
            total as u64
        }
    }

    fn reduce_row(
        band: &Band,
        grid: &GeoTransform,
        aoi: &Aoi,
        scale_m: f64,
        row: usize,
        cols: usize,
    ) -> (f64, usize) {
        let bounds = aoi.bounds();
        let y = bounds.max_y - (row as f64 + 0.5) * scale_m;
        let mut sum = 0.0;
        let mut hits = 0;

        for col in 0..cols {
            let x = bounds.min_x + (col as f64 + 0.5) * scale_m;
            if !aoi.contains(Point::new(x, y)) {
                continue;
            }
            if let Some((r, c)) = grid.pixel_at(x, y, band.dim()) {
                if let Some(value) = band.get(r, c) {
                    sum += value as f64;
                    hits += 1;
                }
            }
        }

        (sum, hits)
    }
}

impl ZonalAreaReducer for GridAreaReducer {
    fn reduce_sum(
        &self,
        band: &Band,
        grid: &GeoTransform,
        aoi: &Aoi,
        params: &ReduceParams,
    ) -> WaterResult<Option<f64>> {
        params.validate()?;

        let required = Self::required_pixels(aoi, params.scale_m);
        if required > params.max_pixels {
            return Err(WaterError::ResourceLimit {
                required,
                budget: params.max_pixels,
            });
        }

        let bounds = aoi.bounds();
        let rows = (bounds.height() / params.scale_m).ceil().max(1.0) as usize;
        let cols = (bounds.width() / params.scale_m).ceil().max(1.0) as usize;
        log::debug!(
            "Reducing {}x{} samples at {} m over {:.3} km²",
            rows,
            cols,
            params.scale_m,
            aoi.area_km2()
        );

        // Row sums are collected in order and added sequentially so the result
        // does not depend on thread scheduling
        #[cfg(feature = "parallel")]
        let row_sums: Vec<(f64, usize)> = {
            use rayon::prelude::*;
            (0..rows)
                .into_par_iter()
                .map(|row| Self::reduce_row(band, grid, aoi, params.scale_m, row, cols))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let row_sums: Vec<(f64, usize)> = (0..rows)
            .map(|row| Self::reduce_row(band, grid, aoi, params.scale_m, row, cols))
            .collect();

        let (sum, hits) = row_sums
            .into_iter()
            .fold((0.0, 0usize), |(s, h), (rs, rh)| (s + rs, h + rh));

        if hits == 0 {
            Ok(None)
        } else {
            Ok(Some(sum))
        }
    }
}
