//! I/O modules for mission timestamps and drift reference tables

pub mod time_codec;
pub mod drift_table;

pub use time_codec::{instant_millis, parse_instant};
pub use drift_table::{DriftTable, DriftTableSource};
