use crate::io::time_codec;
use crate::types::{CalibrationRecord, Channel, RecalError, RecalResult};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// File name of the drift table compiled into the crate
pub const DRIFT_TABLE_DEFAULT_FILE_NAME: &str = "AATSR_VIS_DRIFT_V00-14.DAT";

/// Largest number of records read from any drift table
pub const DRIFT_TABLE_MAX_LENGTH: usize = 5000;

/// Header lines skipped unconditionally before the first record
pub const DRIFT_TABLE_HEADER_LINES: usize = 6;

/// Width of the leading row-index column
const INDEX_COLUMN_WIDTH: usize = 8;

static BUNDLED_DRIFT_TABLE: &str = include_str!("../../resources/AATSR_VIS_DRIFT_V00-14.DAT");

/// Where a drift table is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftTableSource {
    /// Table shipped with the crate
    Bundled,
    /// User supplied table file
    File(PathBuf),
}

impl std::fmt::Display for DriftTableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftTableSource::Bundled => write!(f, "{} (bundled)", DRIFT_TABLE_DEFAULT_FILE_NAME),
            DriftTableSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Time-indexed drift factors for the four visible/SWIR channels.
///
/// Records keep the order of the source file. The table is never modified
/// after loading and can be shared freely between threads.
#[derive(Debug, Clone)]
pub struct DriftTable {
    records: Vec<CalibrationRecord>,
    origin: String,
}

impl DriftTable {
    /// Load a drift table, aborting on the first unreadable or malformed row
    pub fn load(source: &DriftTableSource) -> RecalResult<Self> {
        log::info!("Loading drift correction table: {}", source);
        match source {
            DriftTableSource::Bundled => {
                Self::from_reader(BUNDLED_DRIFT_TABLE.as_bytes(), DRIFT_TABLE_DEFAULT_FILE_NAME)
            }
            DriftTableSource::File(path) => {
                let file = File::open(path).map_err(|e| {
                    RecalError::Load(format!("cannot open '{}': {}", path.display(), e))
                })?;
                Self::from_reader(BufReader::new(file), &path.display().to_string())
            }
        }
    }

    /// Parse a drift table from any buffered reader
    pub fn from_reader<R: BufRead>(reader: R, origin: &str) -> RecalResult<Self> {
        let mut lines = reader.lines();

        for skipped in 0..DRIFT_TABLE_HEADER_LINES {
            match lines.next() {
                Some(line) => {
                    let line = line.map_err(|e| read_failure(origin, e))?;
                    log::debug!(
                        "Skipping drift table header line {}: {}",
                        skipped + 1,
                        line.trim()
                    );
                }
                None => break,
            }
        }

        let mut records = Vec::new();
        for (row, line) in lines.enumerate() {
            if records.len() >= DRIFT_TABLE_MAX_LENGTH {
                log::warn!(
                    "Drift table {} exceeds {} records, ignoring the remainder",
                    origin,
                    DRIFT_TABLE_MAX_LENGTH
                );
                break;
            }
            let line = line.map_err(|e| read_failure(origin, e))?;
            let line_number = row + DRIFT_TABLE_HEADER_LINES + 1;
            records.push(parse_record(&line).map_err(|reason| {
                RecalError::Load(format!("{} line {}: {}", origin, line_number, reason))
            })?);
        }

        match (records.first(), records.last()) {
            (Some(first), Some(last)) => log::info!(
                "Read {} drift table records from {} ({} .. {})",
                records.len(),
                origin,
                first.timestamp,
                last.timestamp
            ),
            _ => log::warn!("Drift table {} contains no records", origin),
        }

        Ok(Self {
            records,
            origin: origin.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CalibrationRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&CalibrationRecord> {
        self.records.get(index)
    }

    pub fn first(&self) -> Option<&CalibrationRecord> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&CalibrationRecord> {
        self.records.last()
    }

    /// Name of the file or resource the table was read from
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Drift factor of `channel` at row `index`
    pub fn drift(&self, channel: Channel, index: usize) -> RecalResult<f64> {
        self.records
            .get(index)
            .map(|record| record.drift(channel))
            .ok_or_else(|| {
                RecalError::Processing(format!(
                    "drift table index {} out of range (table has {} records)",
                    index,
                    self.records.len()
                ))
            })
    }
}

fn read_failure(origin: &str, e: std::io::Error) -> RecalError {
    RecalError::Load(format!("error reading {}: {}", origin, e))
}

fn parse_record(line: &str) -> Result<CalibrationRecord, String> {
    let body = line
        .get(INDEX_COLUMN_WIDTH..)
        .ok_or_else(|| {
            format!(
                "row shorter than the {}-character index column",
                INDEX_COLUMN_WIDTH
            )
        })?;
    let mut tokens = body.trim().split_whitespace();

    let (date, time) = match (tokens.next(), tokens.next()) {
        (Some(date), Some(time)) => (date, time),
        _ => return Err("missing date/time columns".to_string()),
    };
    let timestamp =
        time_codec::parse_instant(&format!("{} {}", date, time)).map_err(|e| e.to_string())?;

    let mut drifts = [0.0f64; 4];
    for (slot, token) in drifts.iter_mut().zip(tokens) {
        *slot = token
            .parse::<f64>()
            .map_err(|e| format!("invalid drift value '{}': {}", token, e))?;
    }

    Ok(CalibrationRecord {
        timestamp,
        drift550: drifts[0],
        drift670: drifts[1],
        drift870: drifts[2],
        drift1600: drifts[3],
    })
}
