use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Floating-point reflectance samples for one tile (rows x columns)
pub type ReflectanceTile = Array2<f64>;

/// Integer flag samples for one tile (rows x columns)
pub type FlagTile = Array2<i32>;

/// AATSR visible/SWIR channels that carry a drift correction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Nm550,
    Nm670,
    Nm870,
    Nm1600,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Nm550, Channel::Nm670, Channel::Nm870, Channel::Nm1600];

    /// Column index of this channel in the drift table and coefficient arrays
    pub fn index(self) -> usize {
        match self {
            Channel::Nm550 => 0,
            Channel::Nm670 => 1,
            Channel::Nm870 => 2,
            Channel::Nm1600 => 3,
        }
    }

    /// Four-digit wavelength tag used in band names
    pub fn band_suffix(self) -> &'static str {
        match self {
            Channel::Nm550 => "0550",
            Channel::Nm670 => "0670",
            Channel::Nm870 => "0870",
            Channel::Nm1600 => "1600",
        }
    }

    pub fn from_wavelength(nm: u32) -> Option<Self> {
        match nm {
            550 => Some(Channel::Nm550),
            670 => Some(Channel::Nm670),
            870 => Some(Channel::Nm870),
            1600 => Some(Channel::Nm1600),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Nm550 => write!(f, "550nm"),
            Channel::Nm670 => write!(f, "670nm"),
            Channel::Nm870 => write!(f, "870nm"),
            Channel::Nm1600 => write!(f, "1600nm"),
        }
    }
}

/// Viewing geometry. Both views share the same channel calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum View {
    Nadir,
    Forward,
}

impl View {
    pub const ALL: [View; 2] = [View::Nadir, View::Forward];

    pub fn band_tag(self) -> &'static str {
        match self {
            View::Nadir => "nadir",
            View::Forward => "fward",
        }
    }
}

/// One of the eight recalibratable reflectance bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReflectanceBand {
    pub view: View,
    pub channel: Channel,
}

impl ReflectanceBand {
    pub fn new(view: View, channel: Channel) -> Self {
        Self { view, channel }
    }

    /// All eight bands, nadir first
    pub fn all() -> impl Iterator<Item = ReflectanceBand> {
        View::ALL.into_iter().flat_map(|view| {
            Channel::ALL
                .into_iter()
                .map(move |channel| ReflectanceBand { view, channel })
        })
    }

    /// L1b band name, e.g. `reflec_nadir_0550`
    pub fn name(&self) -> String {
        format!("reflec_{}_{}", self.view.band_tag(), self.channel.band_suffix())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().find(|band| band.name() == name)
    }
}

/// Historical drift correction regime already applied to the input reflectances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrectionEpoch {
    /// No drift correction applied upstream
    None = 0,
    /// Exponential drift model
    Exponential = 1,
    /// Thin-film (sin^2) drift model
    ThinFilm = 2,
}

impl CorrectionEpoch {
    pub fn index(self) -> u8 {
        self as u8
    }
}

/// One row of the drift reference table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub timestamp: DateTime<Utc>,
    pub drift550: f64,
    pub drift670: f64,
    pub drift870: f64,
    pub drift1600: f64,
}

impl CalibrationRecord {
    pub fn drift(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Nm550 => self.drift550,
            Channel::Nm670 => self.drift670,
            Channel::Nm870 => self.drift870,
            Channel::Nm1600 => self.drift1600,
        }
    }
}

/// Position of an acquisition inside the drift table.
///
/// Times are milliseconds since the Unix epoch. `ati + 1` is always a valid
/// table index for a bracket produced by the correction engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionBracket {
    pub ati: usize,
    pub t: f64,
    pub t_prev: f64,
    pub t_next: f64,
}

/// Error types for recalibration
#[derive(Debug, thiserror::Error)]
pub enum RecalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load drift correction table: {0}")]
    Load(String),

    #[error("Acquisition time out of range: {0}")]
    Range(String),

    #[error("Invalid timestamp '{0}': {1}")]
    InvalidTimestamp(String, String),

    #[error("Invalid companion file name '{0}'")]
    InvalidFilename(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Recalibration failed: {0}")]
    Processing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for recalibration operations
pub type RecalResult<T> = Result<T, RecalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_names_round_trip_through_lookup() {
        let band = ReflectanceBand::new(View::Forward, Channel::Nm870);
        assert_eq!(band.name(), "reflec_fward_0870");
        assert_eq!(ReflectanceBand::from_name("reflec_fward_0870"), Some(band));
        assert_eq!(ReflectanceBand::from_name("btemp_nadir_1200"), None);
        assert_eq!(ReflectanceBand::all().count(), 8);
    }

    #[test]
    fn test_channel_indices_follow_table_columns() {
        let indices: Vec<usize> = Channel::ALL.iter().map(|c| c.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(Channel::from_wavelength(1600), Some(Channel::Nm1600));
        assert_eq!(Channel::from_wavelength(1200), None);
    }
}
