//! Parsing of ENVISAT mission timestamps.
//!
//! Two fixed-width layouts are in use across the L1b headers, the drift
//! table and the timestamps rebuilt from auxiliary file names:
//!
//! * `dd-MMM-yyyy hh:mm:ss` (e.g. `29-NOV-2005 13:20:26`)
//! * `dd-mm-yyyy hh:mm:ss` (e.g. `03-01-2006 04:33:26`)
//!
//! The layout is picked from the character at offset 3. Anything after the
//! seconds field (fractional seconds in `SENSING_START`) is ignored. All
//! calendar fields are interpreted as UTC.

use crate::types::{RecalError, RecalResult};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::OnceLock;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

fn month_table() -> &'static HashMap<&'static str, u32> {
    static MONTHS: OnceLock<HashMap<&'static str, u32>> = OnceLock::new();
    MONTHS.get_or_init(|| {
        [
            "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
        ]
        .into_iter()
        .zip(1u32..)
        .collect()
    })
}

/// Character offsets of each field for one timestamp layout
struct Layout {
    month: (usize, usize),
    year: (usize, usize),
    hour: (usize, usize),
    minute: (usize, usize),
    second: (usize, usize),
}

const NAMED_MONTH: Layout = Layout {
    month: (3, 6),
    year: (7, 11),
    hour: (12, 14),
    minute: (15, 17),
    second: (18, 20),
};

const NUMERIC_MONTH: Layout = Layout {
    month: (3, 5),
    year: (6, 10),
    hour: (11, 13),
    minute: (14, 16),
    second: (17, 19),
};

fn invalid(text: &str, reason: impl Into<String>) -> RecalError {
    RecalError::InvalidTimestamp(text.to_string(), reason.into())
}

fn field<'a>(text: &'a str, (start, end): (usize, usize), name: &str) -> RecalResult<&'a str> {
    text.get(start..end)
        .ok_or_else(|| invalid(text, format!("too short for {} field at {}..{}", name, start, end)))
}

fn numeric_field(text: &str, range: (usize, usize), name: &str) -> RecalResult<u32> {
    let raw = field(text, range, name)?;
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(text, format!("{} field '{}' is not numeric", name, raw)));
    }
    raw.parse::<u32>()
        .map_err(|e| invalid(text, format!("{} field '{}': {}", name, raw, e)))
}

/// Parse a mission timestamp into a UTC instant
pub fn parse_instant(text: &str) -> RecalResult<DateTime<Utc>> {
    let numeric_month = match text.as_bytes().get(3) {
        Some(b) => b.is_ascii_digit(),
        None => return Err(invalid(text, "too short to determine the month layout")),
    };

    let (layout, month) = if numeric_month {
        (&NUMERIC_MONTH, numeric_field(text, NUMERIC_MONTH.month, "month")?)
    } else {
        let name = field(text, NAMED_MONTH.month, "month")?.to_ascii_uppercase();
        let month = month_table()
            .get(name.as_str())
            .copied()
            .ok_or_else(|| invalid(text, format!("unknown month name '{}'", name)))?;
        (&NAMED_MONTH, month)
    };

    let day = numeric_field(text, (0, 2), "day")?;
    let year = numeric_field(text, layout.year, "year")?;
    let hour = numeric_field(text, layout.hour, "hour")?;
    let minute = numeric_field(text, layout.minute, "minute")?;
    let second = numeric_field(text, layout.second, "second")?;

    let naive = NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .ok_or_else(|| invalid(text, "calendar fields out of range"))?;

    Ok(Utc.from_utc_datetime(&naive))
}

/// Milliseconds since the Unix epoch for a mission timestamp
pub fn instant_millis(text: &str) -> RecalResult<i64> {
    Ok(parse_instant(text)?.timestamp_millis())
}

/// Fractional days between two instants (`later - earlier`)
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later.timestamp_millis() - earlier.timestamp_millis()) as f64 / MILLIS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_named_month_layout() {
        let t = parse_instant("29-NOV-2005 13:20:26").unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2005, 11, 29));
        assert_eq!((t.hour(), t.minute(), t.second()), (13, 20, 26));
    }

    #[test]
    fn test_numeric_month_layout() {
        let t = parse_instant("03-01-2006 04:33:26").unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2006, 1, 3));
        assert_eq!((t.hour(), t.minute(), t.second()), (4, 33, 26));
    }

    #[test]
    fn test_both_layouts_agree() {
        assert_eq!(
            parse_instant("18-DEC-2006 20:14:15").unwrap(),
            parse_instant("18-12-2006 20:14:15").unwrap()
        );
    }

    #[test]
    fn test_trailing_fraction_is_ignored() {
        assert_eq!(
            parse_instant("07-JUN-2008 04:33:26.123456").unwrap(),
            parse_instant("07-JUN-2008 04:33:26").unwrap()
        );
    }

    #[test]
    fn test_lowercase_month_name() {
        assert_eq!(
            parse_instant("01-mar-2002 00:00:00").unwrap(),
            parse_instant("01-MAR-2002 00:00:00").unwrap()
        );
    }

    #[test]
    fn test_ordering_includes_time_of_day() {
        let morning = instant_millis("04-MAR-2002 00:00:00").unwrap();
        let later = instant_millis("04-MAR-2002 03:00:00").unwrap();
        assert_eq!(later - morning, 3 * 3_600_000);
    }

    #[test]
    fn test_malformed_input_is_a_typed_error() {
        let inputs = [
            "bla",
            "",
            "01-",
            "01-MAR-2002",
            "xx-MAR-2002 00:00:00",
            "01-FOO-2002 00:00:00",
        ];
        for text in inputs {
            match parse_instant(text) {
                Err(RecalError::InvalidTimestamp(input, _)) => assert_eq!(input, text),
                other => panic!("expected InvalidTimestamp for '{}', got {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_impossible_calendar_date_rejected() {
        assert!(parse_instant("31-FEB-2004 00:00:00").is_err());
        assert!(parse_instant("01-13-2004 00:00:00").is_err());
    }

    #[test]
    fn test_days_between() {
        let launch = parse_instant("01-MAR-2002 00:00:00").unwrap();
        let later = parse_instant("03-MAR-2002 12:00:00").unwrap();
        assert!((days_between(launch, later) - 2.5).abs() < 1e-12);
    }
}
