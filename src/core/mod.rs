//! Core recalibration modules

pub mod correction;
pub mod product;
pub mod recalibrate;

// Re-export main types
pub use correction::{
    drift_factor, CorrectionEngine, ProductContext, NONLINEARITY_UNCORRECTED_GC1_FILE,
};
pub use product::{
    BandKind, MemoryProduct, MetadataElement, SourceProduct, TargetProduct, TileIterator, TileRect,
};
pub use recalibrate::{CancellationToken, RecalibrationReport, RecalibrationStatus, Recalibrator};
