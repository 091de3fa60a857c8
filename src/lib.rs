//! aatsr-recal: long-term drift recalibration of AATSR L1b reflectances
//!
//! Reflectances in AATSR L1b products carry whichever drift correction the
//! ground segment applied at processing time, and early products also lack
//! the 1.6um nonlinearity correction. This crate removes the historical
//! correction, restores the nonlinear 1.6um conversion where needed, and
//! re-applies a drift correction interpolated from a time-indexed reference
//! table.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use config::{BandSelection, RecalibrationConfig};
pub use core::{
    CancellationToken, CorrectionEngine, MemoryProduct, ProductContext, RecalibrationReport,
    RecalibrationStatus, Recalibrator, SourceProduct, TargetProduct,
};
pub use io::{DriftTable, DriftTableSource};
pub use types::{
    AcquisitionBracket, CalibrationRecord, Channel, CorrectionEpoch, RecalError, RecalResult,
    ReflectanceBand, View,
};
