use crate::config::RecalibrationConfig;
use crate::io::time_codec::{self, days_between};
use crate::io::{DriftTable, DriftTableSource};
use crate::types::{AcquisitionBracket, Channel, CorrectionEpoch, RecalError, RecalResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::f64::consts::PI;
use std::sync::OnceLock;

/// ENVISAT launch, the earliest acceptable acquisition time
pub const ENVISAT_LAUNCH: &str = "01-MAR-2002 00:00:00";

/// VC1 reference time from which the exponential drift model was applied upstream
pub const EXPONENTIAL_EPOCH_START: &str = "29-NOV-2005 13:20:26";

/// VC1 reference time from which the thin-film drift model was applied upstream
pub const THIN_FILM_EPOCH_START: &str = "18-DEC-2006 20:14:15";

/// GC1 file in use while the 1.6um nonlinearity correction was still missing
/// from the ground segment.
///
/// L1b products processed with this file carry a linear 1.6um conversion,
/// which is replaced by the pre-launch nonlinear conversion. Every other
/// GC1 file already includes the nonlinear conversion.
pub const NONLINEARITY_UNCORRECTED_GC1_FILE: &str =
    "ATS_GC1_AXVIEC20020123_073430_20020101_000000_20200101_000000";

/// Pre-launch nonlinearity coefficients of the 1.6um channel
const NONLINEARITY_COEFFS: [f64; 4] = [-0.000027, -0.1093, 0.009393, 0.001013];

/// Yearly exponential drift rates for 550, 670, 870 and 1600nm
const EXPONENTIAL_DRIFT_RATES: [f64; 4] = [0.034, 0.021, 0.013, 0.002];

/// Thin-film drift model (amplitude, angular rate per day) for 550, 670 and 870nm
const THIN_FILM_COEFFS: [[f64; 2]; 3] = [
    [0.083, 1.5868e-3],
    [0.056, 1.2374e-3],
    [0.041, 9.6111e-4],
];

/// Per-product quantities shared by every pixel of every recalibrated band
#[derive(Debug, Clone, PartialEq)]
pub struct ProductContext {
    pub epoch: CorrectionEpoch,
    pub gc1_filename: String,
    pub bracket: AcquisitionBracket,
    /// Days between ENVISAT launch and sensing start
    pub days_since_launch: f64,
}

/// Drift and nonlinearity recalibration backed by one drift table
#[derive(Debug, Clone)]
pub struct CorrectionEngine {
    table: DriftTable,
}

impl CorrectionEngine {
    pub fn new(table: DriftTable) -> Self {
        Self { table }
    }

    /// Load the table selected by `config`
    pub fn from_config(config: &RecalibrationConfig) -> RecalResult<Self> {
        config.validate()?;
        Ok(Self::new(DriftTable::load(&config.drift_table_source())?))
    }

    /// Engine over the drift table compiled into the crate
    pub fn with_bundled_table() -> RecalResult<Self> {
        Ok(Self::new(DriftTable::load(&DriftTableSource::Bundled)?))
    }

    pub fn table(&self) -> &DriftTable {
        &self.table
    }

    /// Classify which drift correction was applied upstream, from the VC1 file name
    pub fn determine_epoch(&self, vc1_filename: &str) -> RecalResult<CorrectionEpoch> {
        let reference = vc1_reference_time(vc1_filename)?;
        let epoch = if reference < time_codec::parse_instant(EXPONENTIAL_EPOCH_START)? {
            CorrectionEpoch::None
        } else if reference < time_codec::parse_instant(THIN_FILM_EPOCH_START)? {
            CorrectionEpoch::Exponential
        } else {
            CorrectionEpoch::ThinFilm
        };
        log::debug!("VC1 file {} -> drift correction epoch {:?}", vc1_filename, epoch);
        Ok(epoch)
    }

    /// Replace the linear 1.6um conversion by the nonlinear one when the
    /// GC1 file shows it was never applied. Other files pass through.
    pub fn invert_nonlinearity(&self, gc1_filename: &str, reflectance: f64) -> f64 {
        if gc1_filename != NONLINEARITY_UNCORRECTED_GC1_FILE {
            return reflectance;
        }
        let volts = -0.816 * (reflectance / 100.0) / 0.192;
        let [a0, a1, a2, a3] = NONLINEARITY_COEFFS;
        PI * (a0 + a1 * volts + a2 * volts * volts + a3 * volts * volts * volts) / 1.553 * 100.0
    }

    /// Undo the drift correction of `epoch` at `t_diff_days` after launch
    pub fn remove_drift_correction(
        &self,
        channel: Channel,
        epoch: CorrectionEpoch,
        t_diff_days: f64,
        reflectance: f64,
    ) -> f64 {
        reflectance * drift_factor(channel, epoch, t_diff_days)
    }

    /// Divide by the table drift of `channel`, linearly interpolated between
    /// rows `ati` and `ati + 1` at time `t_acq` (milliseconds)
    pub fn apply_drift_correction(
        &self,
        t_acq: f64,
        ati: usize,
        t_prev: f64,
        t_next: f64,
        channel: Channel,
        reflectance: f64,
    ) -> RecalResult<f64> {
        let y1 = self.table.drift(channel, ati)?;
        let y2 = self.table.drift(channel, ati + 1)?;
        Ok(reflectance / linear_interpolate(t_acq, t_prev, t_next, y1, y2))
    }

    /// Row preceding the first table entry strictly later than the acquisition.
    ///
    /// `None` when the acquisition is before the first row or no later row
    /// exists, so `ati + 1` is always inside the table.
    pub fn acquisition_time_index(&self, acquisition_time: &str) -> RecalResult<Option<usize>> {
        let t = time_codec::parse_instant(acquisition_time)?;
        Ok(self.index_for(t))
    }

    fn index_for(&self, t: DateTime<Utc>) -> Option<usize> {
        self.table
            .records()
            .iter()
            .position(|record| t < record.timestamp)
            .and_then(|i| i.checked_sub(1))
    }

    /// Acquisition index together with the bracketing table times
    pub fn acquisition_bracket(
        &self,
        acquisition_time: &str,
    ) -> RecalResult<Option<AcquisitionBracket>> {
        let t = time_codec::parse_instant(acquisition_time)?;
        let ati = match self.index_for(t) {
            Some(ati) => ati,
            None => return Ok(None),
        };
        let (prev, next) = match (self.table.get(ati), self.table.get(ati + 1)) {
            (Some(prev), Some(next)) => (prev, next),
            _ => return Ok(None),
        };
        Ok(Some(AcquisitionBracket {
            ati,
            t: t.timestamp_millis() as f64,
            t_prev: prev.timestamp.timestamp_millis() as f64,
            t_next: next.timestamp.timestamp_millis() as f64,
        }))
    }

    /// Check the acquisition time against launch and table coverage.
    ///
    /// Acquisitions before launch are an error. Acquisitions outside the
    /// table return `false`: no recalibration is possible for them.
    pub fn check_acquisition_time_range(&self, acquisition_time: &str) -> RecalResult<bool> {
        let t = time_codec::parse_instant(acquisition_time)?;

        if t < time_codec::parse_instant(ENVISAT_LAUNCH)? {
            return Err(RecalError::Range(format!(
                "Acquisition time {} before ENVISAT launch date",
                acquisition_time
            )));
        }

        let (first, last) = match (self.table.first(), self.table.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                log::info!("Drift table is empty. No recalibration performed.");
                return Ok(false);
            }
        };

        if t < first.timestamp {
            log::info!(
                "Acquisition time {} before start time of drift table. No recalibration performed.",
                acquisition_time
            );
            return Ok(false);
        }
        if t > last.timestamp {
            log::info!(
                "Acquisition time {} after last time of drift table. No recalibration performed.",
                acquisition_time
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Days elapsed between ENVISAT launch and the acquisition
    pub fn days_since_launch(&self, acquisition_time: &str) -> RecalResult<f64> {
        let launch = time_codec::parse_instant(ENVISAT_LAUNCH)?;
        Ok(days_between(launch, time_codec::parse_instant(acquisition_time)?))
    }

    /// Derive the per-product context from the sensing start and the
    /// VC1/GC1 companion file names
    pub fn product_context(
        &self,
        sensing_start: &str,
        vc1_filename: &str,
        gc1_filename: &str,
    ) -> RecalResult<ProductContext> {
        let bracket = self.acquisition_bracket(sensing_start)?.ok_or_else(|| {
            RecalError::Processing(format!(
                "no drift table interval brackets acquisition time {}",
                sensing_start
            ))
        })?;
        Ok(ProductContext {
            epoch: self.determine_epoch(vc1_filename)?,
            gc1_filename: gc1_filename.to_string(),
            bracket,
            days_since_launch: self.days_since_launch(sensing_start)?,
        })
    }

    /// Full recalibration chain for one reflectance value
    pub fn recalibrate_pixel(
        &self,
        ctx: &ProductContext,
        channel: Channel,
        reflectance: f64,
    ) -> RecalResult<f64> {
        let linearised = if channel == Channel::Nm1600 {
            self.invert_nonlinearity(&ctx.gc1_filename, reflectance)
        } else {
            reflectance
        };
        let undrifted =
            self.remove_drift_correction(channel, ctx.epoch, ctx.days_since_launch, linearised);
        let b = &ctx.bracket;
        self.apply_drift_correction(b.t, b.ati, b.t_prev, b.t_next, channel, undrifted)
    }
}

/// Drift multiplier applied upstream under `epoch`
pub fn drift_factor(channel: Channel, epoch: CorrectionEpoch, t_diff_days: f64) -> f64 {
    let c = channel.index();
    match (channel, epoch) {
        (Channel::Nm1600, CorrectionEpoch::None) => 1.0,
        (Channel::Nm1600, _) | (_, CorrectionEpoch::Exponential) => {
            (EXPONENTIAL_DRIFT_RATES[c] * t_diff_days / 365.0).exp()
        }
        (_, CorrectionEpoch::ThinFilm) => {
            let [amplitude, rate] = THIN_FILM_COEFFS[c];
            let s = (rate * t_diff_days).sin();
            1.0 + amplitude * s * s
        }
        (_, CorrectionEpoch::None) => 1.0,
    }
}

fn linear_interpolate(x: f64, x1: f64, x2: f64, y1: f64, y2: f64) -> f64 {
    if x1 == x2 {
        y1
    } else {
        let slope = (y2 - y1) / (x2 - x1);
        y1 + slope * (x - x1)
    }
}

/// Reference time embedded at a fixed position of a VC1 file name,
/// e.g. `ATS_VC1_AXVIEC20080607_043326_...` -> 07-06-2008 04:33:26
fn vc1_reference_time(vc1_filename: &str) -> RecalResult<DateTime<Utc>> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^.{14}(\d{4})(\d{2})(\d{2}).(\d{2})(\d{2})(\d{2})").expect("static regex")
    });

    let caps = pattern
        .captures(vc1_filename)
        .ok_or_else(|| RecalError::InvalidFilename(vc1_filename.to_string()))?;
    let reference = format!(
        "{}-{}-{} {}:{}:{}",
        &caps[3], &caps[2], &caps[1], &caps[4], &caps[5], &caps[6]
    );
    time_codec::parse_instant(&reference)
}
