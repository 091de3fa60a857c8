use crate::io::DriftTableSource;
use crate::types::{Channel, RecalError, RecalResult, ReflectanceBand, View};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Per-band recalibration switches, all enabled by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandSelection {
    pub nadir_0550: bool,
    pub nadir_0670: bool,
    pub nadir_0870: bool,
    pub nadir_1600: bool,
    pub fward_0550: bool,
    pub fward_0670: bool,
    pub fward_0870: bool,
    pub fward_1600: bool,
}

impl Default for BandSelection {
    fn default() -> Self {
        Self::all(true)
    }
}

impl BandSelection {
    pub fn all(enabled: bool) -> Self {
        Self {
            nadir_0550: enabled,
            nadir_0670: enabled,
            nadir_0870: enabled,
            nadir_1600: enabled,
            fward_0550: enabled,
            fward_0670: enabled,
            fward_0870: enabled,
            fward_1600: enabled,
        }
    }

    pub fn is_enabled(&self, band: ReflectanceBand) -> bool {
        *self.slot(band.view, band.channel)
    }

    pub fn set(&mut self, band: ReflectanceBand, enabled: bool) {
        *self.slot_mut(band.view, band.channel) = enabled;
    }

    fn slot(&self, view: View, channel: Channel) -> &bool {
        match (view, channel) {
            (View::Nadir, Channel::Nm550) => &self.nadir_0550,
            (View::Nadir, Channel::Nm670) => &self.nadir_0670,
            (View::Nadir, Channel::Nm870) => &self.nadir_0870,
            (View::Nadir, Channel::Nm1600) => &self.nadir_1600,
            (View::Forward, Channel::Nm550) => &self.fward_0550,
            (View::Forward, Channel::Nm670) => &self.fward_0670,
            (View::Forward, Channel::Nm870) => &self.fward_0870,
            (View::Forward, Channel::Nm1600) => &self.fward_1600,
        }
    }

    fn slot_mut(&mut self, view: View, channel: Channel) -> &mut bool {
        match (view, channel) {
            (View::Nadir, Channel::Nm550) => &mut self.nadir_0550,
            (View::Nadir, Channel::Nm670) => &mut self.nadir_0670,
            (View::Nadir, Channel::Nm870) => &mut self.nadir_0870,
            (View::Nadir, Channel::Nm1600) => &mut self.nadir_1600,
            (View::Forward, Channel::Nm550) => &mut self.fward_0550,
            (View::Forward, Channel::Nm670) => &mut self.fward_0670,
            (View::Forward, Channel::Nm870) => &mut self.fward_0870,
            (View::Forward, Channel::Nm1600) => &mut self.fward_1600,
        }
    }
}

/// Recalibration parameters supplied by the calling application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecalibrationConfig {
    /// Use `alternate_table_path` instead of the bundled drift table
    pub use_alternate_drift_table: bool,
    pub alternate_table_path: Option<PathBuf>,
    pub bands: BandSelection,
    /// Edge length of the square tiles processed in one unit
    pub tile_size: usize,
}

impl Default for RecalibrationConfig {
    fn default() -> Self {
        Self {
            use_alternate_drift_table: false,
            alternate_table_path: None,
            bands: BandSelection::default(),
            tile_size: 512,
        }
    }
}

impl RecalibrationConfig {
    pub fn from_json_str(json: &str) -> RecalResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> RecalResult<Self> {
        let path = path.as_ref();
        log::debug!("Reading recalibration config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reject settings that would fail before any tile is processed
    pub fn validate(&self) -> RecalResult<()> {
        if self.tile_size == 0 {
            return Err(RecalError::Configuration("tile size must be positive".to_string()));
        }
        if let DriftTableSource::File(path) = self.drift_table_source() {
            if !path.is_file() {
                return Err(RecalError::Configuration(format!(
                    "Failed to load drift correction table '{}'",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Resolve which drift table this configuration asks for
    pub fn drift_table_source(&self) -> DriftTableSource {
        if !self.use_alternate_drift_table {
            return DriftTableSource::Bundled;
        }
        match &self.alternate_table_path {
            Some(path) if !path.as_os_str().is_empty() => DriftTableSource::File(path.clone()),
            _ => {
                log::warn!(
                    "Alternate drift table requested without a path, using the bundled table"
                );
                DriftTableSource::Bundled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_enable_every_band() {
        let config = RecalibrationConfig::default();
        assert!(ReflectanceBand::all().all(|band| config.bands.is_enabled(band)));
        assert_eq!(config.drift_table_source(), DriftTableSource::Bundled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"bands": {"fward_1600": false}, "tile_size": 64}"#;
        let config = RecalibrationConfig::from_json_str(json).unwrap();
        assert_eq!(config.tile_size, 64);
        assert!(!config.bands.is_enabled(ReflectanceBand::new(View::Forward, Channel::Nm1600)));
        assert!(config.bands.is_enabled(ReflectanceBand::new(View::Nadir, Channel::Nm1600)));
        assert!(!config.use_alternate_drift_table);
    }

    #[test]
    fn test_load_from_file() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(br#"{"use_alternate_drift_table": false, "tile_size": 128}"#).unwrap();
        let config = RecalibrationConfig::from_json_file(temp.path()).unwrap();
        assert_eq!(config.tile_size, 128);
    }

    #[test]
    fn test_missing_alternate_table_is_configuration_error() {
        let config = RecalibrationConfig {
            use_alternate_drift_table: true,
            alternate_table_path: Some(PathBuf::from("/nonexistent/AATSR_VIS_DRIFT.DAT")),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RecalError::Configuration(_))));
    }

    #[test]
    fn test_empty_alternate_path_falls_back_to_bundled() {
        let config = RecalibrationConfig {
            use_alternate_drift_table: true,
            alternate_table_path: Some(PathBuf::new()),
            ..Default::default()
        };
        assert_eq!(config.drift_table_source(), DriftTableSource::Bundled);
    }

    #[test]
    fn test_zero_tile_size_rejected() {
        let config = RecalibrationConfig {
            tile_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_band_toggle() {
        let mut bands = BandSelection::all(false);
        let band = ReflectanceBand::new(View::Nadir, Channel::Nm670);
        bands.set(band, true);
        assert!(bands.is_enabled(band));
        assert_eq!(ReflectanceBand::all().filter(|b| bands.is_enabled(*b)).count(), 1);
    }
}
