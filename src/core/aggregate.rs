use crate::types::{AreaRecord, YearlyStat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relative distance from the yearly mean, in ULPs, still counted as equal
const MEAN_TOLERANCE_ULPS: f64 = 4.0;

/// Sum after sorting, so the result is independent of input order
fn ordered_sum(sorted: &[f64]) -> f64 {
    sorted.iter().sum()
}

fn mean_of_sorted(sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        None
    } else {
        Some(ordered_sum(sorted) / sorted.len() as f64)
    }
}

/// Statistics for one year's non-missing water areas
fn yearly_stat(year: i32, mut values: Vec<f64>) -> Option<YearlyStat> {
    values.sort_by(|a, b| a.total_cmp(b));
    let mean = mean_of_sorted(&values)?;

    // Values equal to the mean belong to neither side. The mean carries
    // rounding error, so "equal" means within a few ULPs of it.
    let (below, above): (Vec<f64>, Vec<f64>) = if values.first() == values.last() {
        (Vec::new(), Vec::new())
    } else {
        let tolerance = mean.abs() * MEAN_TOLERANCE_ULPS * f64::EPSILON;
        (
            values.iter().copied().filter(|v| *v < mean - tolerance).collect(),
            values.iter().copied().filter(|v| *v > mean + tolerance).collect(),
        )
    };

    Some(YearlyStat {
        year,
        observations: values.len(),
        mean_water_km2: mean,
        below_avg_mean_km2: mean_of_sorted(&below),
        above_avg_mean_km2: mean_of_sorted(&above),
    })
}

/// Yearly statistics from `(year, water area)` pairs; missing areas are skipped.
/// One entry per year with data, sorted by year.
pub fn aggregate_values<I>(values: I) -> Vec<YearlyStat>
where
    I: IntoIterator<Item = (i32, Option<f64>)>,
{
    let mut by_year: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for (year, area) in values {
        if let Some(area) = area {
            by_year.entry(year).or_default().push(area);
        }
    }

    by_year
        .into_iter()
        .filter_map(|(year, areas)| yearly_stat(year, areas))
        .collect()
}

/// Yearly mean, below-average mean and above-average mean of water area
pub fn aggregate(records: &[AreaRecord]) -> Vec<YearlyStat> {
    let stats = aggregate_values(records.iter().map(|r| (r.year, r.water_area_km2)));
    log::info!(
        "Aggregated {} records into {} yearly statistics",
        records.len(),
        stats.len()
    );
    stats
}

/// Summary statistics over the whole water-area series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    /// Records including those with missing area
    pub total_count: usize,
    /// Records with a water area
    pub valid_count: usize,
    pub sum: f64,
    pub sum_sq: f64,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Population variance
    pub total_var: Option<f64>,
    pub total_sd: Option<f64>,
    /// Sample variance (n - 1), needs two valid records
    pub sample_var: Option<f64>,
    pub sample_sd: Option<f64>,
}

/// Count, extremes, mean and spread of every non-missing water area
pub fn series_stats(records: &[AreaRecord]) -> SeriesStats {
    let mut values: Vec<f64> = records.iter().filter_map(|r| r.water_area_km2).collect();
    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    let sum = ordered_sum(&values);
    let sum_sq: f64 = values.iter().map(|v| v * v).sum();
    let mean = mean_of_sorted(&values);
    let squared_deviation = mean.map(|m| values.iter().map(|v| (v - m) * (v - m)).sum::<f64>());

    let total_var = squared_deviation.map(|s| s / n as f64);
    let sample_var = squared_deviation.filter(|_| n > 1).map(|s| s / (n - 1) as f64);

    SeriesStats {
        total_count: records.len(),
        valid_count: n,
        sum,
        sum_sq,
        mean,
        min: values.first().copied(),
        max: values.last().copied(),
        total_var,
        total_sd: total_var.map(f64::sqrt),
        sample_var,
        sample_sd: sample_var.map(f64::sqrt),
    }
}

/// Records ordered by date, then scene id
pub fn sort_by_date(records: &mut [AreaRecord]) {
    records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.scene_id.cmp(&b.scene_id)));
}
