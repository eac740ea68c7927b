//! Raw sensor record shape
//!
//! Records come out of the document store as loosely typed JSON. Over the
//! life of the dashboard the data-point array moved between two locations and
//! numeric values picked up extended-JSON wrappers (`{"$numberDouble": "5.1"}`),
//! so this module keeps the record as a `serde_json::Value` and offers
//! tolerant accessors instead of a strict struct.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current layout: `{"data": {"data_points": [...]}}`
pub const NEW_POINTS_PATH: [&str; 2] = ["data", "data_points"];

/// Legacy layout: `{"data_snapshot": {"data_points": [...]}}`
pub const OLD_POINTS_PATH: [&str; 2] = ["data_snapshot", "data_points"];

/// Field names a data point may store its timestamp under, in lookup order
pub const TIMESTAMP_KEYS: [&str; 3] = ["timestamp", "time", "date"];

/// Extended-JSON numeric wrapper keys
const NUMBER_WRAPPERS: [&str; 4] = ["$numberDouble", "$numberInt", "$numberLong", "$numberDecimal"];

/// One document from the sensor-record collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawSensorRecord(pub Value);

impl RawSensorRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Data points under the new layout, falling back to the old one.
    ///
    /// Returns an empty slice when neither location holds an array.
    pub fn data_points(&self) -> &[Value] {
        lookup_array(&self.0, &NEW_POINTS_PATH)
            .or_else(|| lookup_array(&self.0, &OLD_POINTS_PATH))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl From<Value> for RawSensorRecord {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn lookup_array<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Vec<Value>> {
    path.iter()
        .try_fold(root, |node, key| node.get(key))
        .and_then(Value::as_array)
}

/// Decode a loosely typed numeric value.
///
/// Accepts JSON numbers, numeric strings, and extended-JSON wrappers. Only
/// finite results count as present.
pub fn decode_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Object(map) => NUMBER_WRAPPERS
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(decode_number),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Which timestamp encoding a data point used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    /// `{"$date": {"$numberLong": "<millis>"}}`
    EpochMillisWrapper,
    /// `{"$date": "<ISO-8601>"}` or `{"$date": <millis>}`
    DateWrapper,
    /// Plain date-like string
    DateString,
    /// Plain epoch-seconds number, or a numeric string
    EpochSeconds,
}

/// Extract a data point's timestamp, trying each encoding in priority order.
pub fn extract_timestamp(point: &Value) -> Option<(DateTime<Utc>, TimestampSource)> {
    let fields: Vec<&Value> = TIMESTAMP_KEYS.iter().filter_map(|k| point.get(*k)).collect();

    let strategies: [(TimestampSource, fn(&Value) -> Option<DateTime<Utc>>); 4] = [
        (TimestampSource::EpochMillisWrapper, millis_wrapper),
        (TimestampSource::DateWrapper, date_wrapper),
        (TimestampSource::DateString, date_string),
        (TimestampSource::EpochSeconds, epoch_seconds),
    ];

    strategies.iter().find_map(|(source, parse)| {
        fields
            .iter()
            .find_map(|field| parse(field))
            .map(|ts| (ts, *source))
    })
}

fn millis_wrapper(field: &Value) -> Option<DateTime<Utc>> {
    let inner = field.get("$date")?.get("$numberLong")?;
    let millis = decode_number(inner)?;
    Utc.timestamp_millis_opt(millis as i64).single()
}

fn date_wrapper(field: &Value) -> Option<DateTime<Utc>> {
    match field.get("$date")? {
        Value::String(s) => parse_date_string(s),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_f64()? as i64).single(),
        _ => None,
    }
}

fn date_string(field: &Value) -> Option<DateTime<Utc>> {
    field.as_str().and_then(parse_date_string)
}

fn epoch_seconds(field: &Value) -> Option<DateTime<Utc>> {
    let secs = decode_number(field)?;
    let millis = (secs * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

/// Offset-carrying layouts beyond RFC 3339, e.g. `+0000` without a colon
const ZONED_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Zone-less layouts, taken as UTC
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a date-like string.
///
/// Accepts RFC 3339, ISO 8601 with a `+hhmm` offset, zone-less date-times
/// with or without seconds, and a bare `YYYY-MM-DD` at midnight. Zone-less
/// values are taken as UTC.
pub fn parse_date_string(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = ZONED_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
    {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| Utc.from_utc_datetime(&naive))
}
