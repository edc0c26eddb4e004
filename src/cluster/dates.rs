//! Capture-date gating.
//!
//! A cluster only serves captures inside its `[_EARLIEST, _LATEST]`
//! window. A key's capture date is its 14-digit timestamp (the token after
//! the urlkey); shorter timestamps are padded to the earliest instant they
//! cover. Anything unparseable is let through.

use chrono::{NaiveDate, NaiveDateTime};

/// Digits in a full `yyyyMMddHHmmss` timestamp.
pub const TIMESTAMP_DIGITS: usize = 14;

/// Shortest timestamp accepted for padding (a bare year).
const MIN_TIMESTAMP_DIGITS: usize = 4;

/// Earliest-instant filler for every position of a timestamp.
const TIMESTAMP_FLOOR: &str = "00000101000000";

const CONTROL_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CONTROL_DAY_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Inclusive date window. A missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDateTime>, to: Option<NaiveDateTime>) -> Self {
        Self { from, to }
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, when: NaiveDateTime) -> bool {
        self.from.map_or(true, |from| when >= from) && self.to.map_or(true, |to| when <= to)
    }

    /// True unless `key` carries a timestamp outside the window.
    pub fn admits_key(&self, key: &str) -> bool {
        if self.is_unbounded() {
            return true;
        }
        match key_timestamp(key) {
            Some(when) => self.contains(when),
            None => true,
        }
    }
}

/// Parse an `_EARLIEST` / `_LATEST` value: `yyyy-MM-dd HH:mm:ss`, or a
/// bare `yyyy-MM-dd` meaning midnight.
pub fn parse_control_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, CONTROL_DATE_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, CONTROL_DAY_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Pad a 4 to 14 digit timestamp to 14 digits with the earliest instant
/// it covers (`2012` becomes `20120101000000`).
pub fn pad_timestamp(ts: &str) -> Option<String> {
    if ts.len() < MIN_TIMESTAMP_DIGITS
        || ts.len() > TIMESTAMP_DIGITS
        || !ts.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let mut padded = ts.to_string();
    padded.push_str(&TIMESTAMP_FLOOR[ts.len()..]);
    Some(padded)
}

/// Capture date of a CDX or summary key: the token after the first space.
pub fn key_timestamp(key: &str) -> Option<NaiveDateTime> {
    let (_, rest) = key.split_once(' ')?;
    let token = rest.split([' ', '\t']).next()?;
    let padded = pad_timestamp(token)?;
    NaiveDateTime::parse_from_str(&padded, TIMESTAMP_FORMAT).ok()
}
