//! Shared record model: instrument key, time-range alignment and the header every
//! emitted record carries.
//!
//! On the wire a header is flattened into its record as
//! `key {symbol, timestamp}`, `time_range` and an explicit `time_range_timestamp`, so
//! downstream consumers never have to recompute the alignment themselves.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 1970-01-01 was a Thursday; the first Monday after the epoch is 4 days later.
const EPOCH_TO_MONDAY_DAYS: i64 = 4;

/// Errors raised by the record model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record has no key, aligned timestamp is undefined")]
    MissingKey,
    #[error("time_range_timestamp {actual} does not match {expected} derived from the key")]
    TimestampMismatch { expected: i64, actual: i64 },
    #[error("time_range_timestamp {0} present on a record without a key")]
    OrphanTimestamp(i64),
    #[error("invalid time range {0:?}; expected millisecond|minute|day|week")]
    UnknownTimeRange(String),
}

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// One sample of one instrument at one absolute instant (millis since epoch, UTC).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolTimestampKey {
    pub symbol: String,
    pub timestamp: i64,
}

impl SymbolTimestampKey {
    pub fn new(symbol: impl Into<String>, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
        }
    }
}

impl fmt::Display for SymbolTimestampKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timestamp)
    }
}

// ---------------------------------------------------------------------------
// Time range
// ---------------------------------------------------------------------------

/// Bucket granularity used to align a timestamp to the start of its bucket.
///
/// Serializes as `MILLISECOND`/`MINUTE`/`DAY`/`WEEK`; deserializes from any spelling
/// [`FromStr`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum TimeRange {
    #[default]
    Millisecond,
    Minute,
    Day,
    Week,
}

impl TimeRange {
    /// Width of one bucket in milliseconds.
    pub fn bucket_millis(self) -> i64 {
        match self {
            TimeRange::Millisecond => 1,
            TimeRange::Minute => Duration::minutes(1).num_milliseconds(),
            TimeRange::Day => Duration::days(1).num_milliseconds(),
            TimeRange::Week => Duration::weeks(1).num_milliseconds(),
        }
    }

    /// Start of the bucket containing `timestamp`.
    ///
    /// Weeks start on Monday 00:00:00.000 UTC. Timestamps before the epoch floor
    /// toward the past, and the result saturates at `i64::MIN` instead of overflowing.
    pub fn align(self, timestamp: i64) -> i64 {
        let offset = match self {
            TimeRange::Millisecond => return timestamp,
            TimeRange::Minute | TimeRange::Day => 0,
            TimeRange::Week => Duration::days(EPOCH_TO_MONDAY_DAYS).num_milliseconds(),
        };
        let ts = i128::from(timestamp);
        let bucket = i128::from(self.bucket_millis());
        let aligned = ts - (ts - i128::from(offset)).rem_euclid(bucket);
        i64::try_from(aligned).unwrap_or(i64::MIN)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::Millisecond => "millisecond",
            TimeRange::Minute => "minute",
            TimeRange::Day => "day",
            TimeRange::Week => "week",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "millisecond" | "ms" => Ok(TimeRange::Millisecond),
            "minute" | "1m" => Ok(TimeRange::Minute),
            "day" | "1d" => Ok(TimeRange::Day),
            "week" | "1w" => Ok(TimeRange::Week),
            _ => Err(RecordError::UnknownTimeRange(s.to_string())),
        }
    }
}

impl TryFrom<String> for TimeRange {
    type Error = RecordError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Identity and bucket of an emitted record.
///
/// Key-agnostic aggregators (EMA, MACD) emit records with `key == None`; the caller
/// attaches identity before publishing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "HeaderWire", try_from = "HeaderWire")]
pub struct RecordHeader {
    pub key: Option<SymbolTimestampKey>,
    pub time_range: TimeRange,
}

impl RecordHeader {
    pub fn new(key: SymbolTimestampKey, time_range: TimeRange) -> Self {
        Self {
            key: Some(key),
            time_range,
        }
    }

    pub fn keyless() -> Self {
        Self::default()
    }

    pub fn symbol(&self) -> Option<&str> {
        self.key.as_ref().map(|k| k.symbol.as_str())
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.key.as_ref().map(|k| k.timestamp)
    }

    /// The key's timestamp aligned to `time_range`.
    pub fn time_range_timestamp(&self) -> Result<i64, RecordError> {
        self.key
            .as_ref()
            .map(|k| self.time_range.align(k.timestamp))
            .ok_or(RecordError::MissingKey)
    }
}

#[derive(Serialize, Deserialize)]
struct HeaderWire {
    #[serde(default)]
    key: Option<SymbolTimestampKey>,
    #[serde(default)]
    time_range: TimeRange,
    #[serde(default)]
    time_range_timestamp: Option<i64>,
}

impl From<RecordHeader> for HeaderWire {
    fn from(h: RecordHeader) -> Self {
        let time_range_timestamp = h.time_range_timestamp().ok();
        Self {
            key: h.key,
            time_range: h.time_range,
            time_range_timestamp,
        }
    }
}

impl TryFrom<HeaderWire> for RecordHeader {
    type Error = RecordError;

    fn try_from(w: HeaderWire) -> Result<Self, Self::Error> {
        let header = RecordHeader {
            key: w.key,
            time_range: w.time_range,
        };
        match (w.time_range_timestamp, header.time_range_timestamp()) {
            (Some(actual), Ok(expected)) if actual != expected => {
                Err(RecordError::TimestampMismatch { expected, actual })
            }
            (Some(actual), Err(_)) => Err(RecordError::OrphanTimestamp(actual)),
            _ => Ok(header),
        }
    }
}

/// Common surface of every emitted record.
pub trait AggregateRecord {
    fn header(&self) -> &RecordHeader;
    fn header_mut(&mut self) -> &mut RecordHeader;

    fn key(&self) -> Option<&SymbolTimestampKey> {
        self.header().key.as_ref()
    }

    fn time_range(&self) -> TimeRange {
        self.header().time_range
    }

    fn time_range_timestamp(&self) -> Result<i64, RecordError> {
        self.header().time_range_timestamp()
    }

    /// Replace the header with an independent copy of `header`.
    fn with_header(mut self, header: &RecordHeader) -> Self
    where
        Self: Sized,
    {
        *self.header_mut() = header.clone();
        self
    }
}

macro_rules! impl_aggregate_record {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::record::AggregateRecord for $ty {
                fn header(&self) -> &$crate::record::RecordHeader {
                    &self.header
                }
                fn header_mut(&mut self) -> &mut $crate::record::RecordHeader {
                    &mut self.header
                }
            }
        )+
    };
}
pub(crate) use impl_aggregate_record;

// ---------------------------------------------------------------------------
// Plain scalar record
// ---------------------------------------------------------------------------

/// A single smoothed value and its change since the previous emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub value: f64,
    pub v_change: Option<f64>,
}

impl_aggregate_record!(DoubleRecord);
