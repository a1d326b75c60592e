//! Python bindings for the per-pixel classifiers and yearly aggregation

use crate::core::{aggregate_values, normalized_difference, polarization_ratio_water};
use crate::types::{Band, WaterError};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;

fn to_py_err(e: WaterError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
}

/// NDWI of two reflectance arrays; NaN marks masked pixels in and out
#[pyfunction]
fn ndwi<'py>(
    py: Python<'py>,
    green: PyReadonlyArray2<'py, f32>,
    nir: PyReadonlyArray2<'py, f32>,
) -> PyResult<&'py PyArray2<f32>> {
    let green = Band::from_data(green.as_array().to_owned());
    let nir = Band::from_data(nir.as_array().to_owned());
    let index = normalized_difference(&green, &nir).map_err(to_py_err)?;
    Ok(index.to_nan_filled().into_pyarray(py))
}

/// Binary water map from co- and cross-polarised backscatter
#[pyfunction]
#[pyo3(signature = (vv, vh, threshold = 2.0))]
fn radar_water<'py>(
    py: Python<'py>,
    vv: PyReadonlyArray2<'py, f32>,
    vh: PyReadonlyArray2<'py, f32>,
    threshold: f32,
) -> PyResult<&'py PyArray2<f32>> {
    let vv = Band::from_data(vv.as_array().to_owned());
    let vh = Band::from_data(vh.as_array().to_owned());
    let water = polarization_ratio_water(&vv, &vh, threshold, 1e-6).map_err(to_py_err)?;
    Ok(water.to_nan_filled().into_pyarray(py))
}

/// Yearly statistics as `(year, observations, mean, below_mean, above_mean)` tuples
#[pyfunction]
fn yearly_stats(
    years: Vec<i32>,
    areas: Vec<Option<f64>>,
) -> PyResult<Vec<(i32, usize, f64, Option<f64>, Option<f64>)>> {
    if years.len() != areas.len() {
        return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
            "years ({}) and areas ({}) differ in length",
            years.len(),
            areas.len()
        )));
    }

    Ok(aggregate_values(years.into_iter().zip(areas))
        .into_iter()
        .map(|s| {
            (
                s.year,
                s.observations,
                s.mean_water_km2,
                s.below_avg_mean_km2,
                s.above_avg_mean_km2,
            )
        })
        .collect())
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(ndwi, m)?)?;
    m.add_function(wrap_pyfunction!(radar_water, m)?)?;
    m.add_function(wrap_pyfunction!(yearly_stats, m)?)?;
    Ok(())
}
