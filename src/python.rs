//! Python bindings, enabled with the `python` feature

use crate::config::RecalibrationConfig;
use crate::core::{Recalibrator, NONLINEARITY_UNCORRECTED_GC1_FILE};
use crate::io::time_codec;
use crate::types::{Channel, CorrectionEpoch, RecalError};
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::path::PathBuf;

fn to_py_err(e: RecalError) -> PyErr {
    match e {
        RecalError::InvalidTimestamp(..)
        | RecalError::InvalidFilename(_)
        | RecalError::Configuration(_)
        | RecalError::Range(_) => PyValueError::new_err(format!("{}", e)),
        _ => PyRuntimeError::new_err(format!("{}", e)),
    }
}

fn channel(wavelength: u32) -> PyResult<Channel> {
    Channel::from_wavelength(wavelength)
        .ok_or_else(|| PyValueError::new_err(format!("Invalid channel: {} nm", wavelength)))
}

fn epoch(index: u8) -> PyResult<CorrectionEpoch> {
    match index {
        0 => Ok(CorrectionEpoch::None),
        1 => Ok(CorrectionEpoch::Exponential),
        2 => Ok(CorrectionEpoch::ThinFilm),
        _ => Err(PyValueError::new_err(format!("Invalid correction epoch: {}", index))),
    }
}

/// Python wrapper for Recalibrator
#[pyclass(name = "Recalibrator")]
struct PyRecalibrator {
    inner: Recalibrator,
}

#[pymethods]
impl PyRecalibrator {
    #[new]
    #[pyo3(signature = (drift_table_path=None))]
    fn new(drift_table_path: Option<String>) -> PyResult<Self> {
        let config = RecalibrationConfig {
            use_alternate_drift_table: drift_table_path.is_some(),
            alternate_table_path: drift_table_path.map(PathBuf::from),
            ..Default::default()
        };
        let inner = Recalibrator::new(config).map_err(to_py_err)?;
        Ok(PyRecalibrator { inner })
    }

    fn table_length(&self) -> usize {
        self.inner.engine().table().len()
    }

    fn determine_epoch(&self, vc1_filename: &str) -> PyResult<u8> {
        self.inner
            .engine()
            .determine_epoch(vc1_filename)
            .map(CorrectionEpoch::index)
            .map_err(to_py_err)
    }

    fn invert_nonlinearity(&self, gc1_filename: &str, reflectance: f64) -> f64 {
        self.inner.engine().invert_nonlinearity(gc1_filename, reflectance)
    }

    fn remove_drift_correction(
        &self,
        wavelength: u32,
        epoch_index: u8,
        t_diff_days: f64,
        reflectance: f64,
    ) -> PyResult<f64> {
        Ok(self.inner.engine().remove_drift_correction(
            channel(wavelength)?,
            epoch(epoch_index)?,
            t_diff_days,
            reflectance,
        ))
    }

    fn apply_drift_correction(
        &self,
        t_acq: f64,
        ati: usize,
        t_prev: f64,
        t_next: f64,
        wavelength: u32,
        reflectance: f64,
    ) -> PyResult<f64> {
        self.inner
            .engine()
            .apply_drift_correction(t_acq, ati, t_prev, t_next, channel(wavelength)?, reflectance)
            .map_err(to_py_err)
    }

    /// Table index bracketing the acquisition, or -1
    fn acquisition_time_index(&self, acquisition_time: &str) -> PyResult<i64> {
        let index = self
            .inner
            .engine()
            .acquisition_time_index(acquisition_time)
            .map_err(to_py_err)?;
        Ok(index.map_or(-1, |i| i as i64))
    }

    fn check_acquisition_time_range(&self, acquisition_time: &str) -> PyResult<bool> {
        self.inner
            .engine()
            .check_acquisition_time_range(acquisition_time)
            .map_err(to_py_err)
    }

    /// Recalibrate a whole reflectance band given as a 2D numpy array
    fn recalibrate_band(
        &self,
        py: Python,
        data: PyReadonlyArray2<f64>,
        wavelength: u32,
        sensing_start: &str,
        vc1_filename: &str,
        gc1_filename: &str,
    ) -> PyResult<PyObject> {
        let channel = channel(wavelength)?;
        let input = data.as_array().to_owned();
        let output = self
            .inner
            .recalibrate_array(sensing_start, vc1_filename, gc1_filename, channel, &input)
            .map_err(to_py_err)?;
        let numpy_array = output.to_pyarray(py);
        Ok(numpy_array.into())
    }
}

/// Milliseconds since the Unix epoch for a mission timestamp
#[pyfunction]
fn instant_millis(text: &str) -> PyResult<i64> {
    time_codec::instant_millis(text).map_err(to_py_err)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyRecalibrator>()?;
    m.add_function(wrap_pyfunction!(instant_millis, m)?)?;
    m.add("NONLINEARITY_UNCORRECTED_GC1_FILE", NONLINEARITY_UNCORRECTED_GC1_FILE)?;
    Ok(())
}
