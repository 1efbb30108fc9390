//! Conversion of Snowflake JSON rowsets into typed values.
//!
//! In the JSON result format every cell arrives as a string (or null) and the
//! column's `rowtype` entry says how to read it.

use super::{ColumnInfo, Row, Value};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};

/// Days between 0001-01-01 (day 1) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Snowflake encodes the `TIMESTAMP_TZ` offset as minutes plus this bias.
const TZ_OFFSET_BIAS_MINUTES: i32 = 1440;

/// Converts one raw JSON row using the column metadata.
pub(crate) fn convert_row(columns: &[ColumnInfo], raw: Vec<serde_json::Value>) -> Row {
    raw.into_iter()
        .enumerate()
        .map(|(i, cell)| match columns.get(i) {
            Some(column) => convert_cell(column, cell),
            None => convert_untyped(cell),
        })
        .collect()
}

fn convert_cell(column: &ColumnInfo, cell: serde_json::Value) -> Value {
    match cell {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::String(raw) => convert_value(column, raw),
        other => convert_value(column, other.to_string()),
    }
}

fn convert_untyped(cell: serde_json::Value) -> Value {
    match cell {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::String(raw) => Value::String(raw),
        other => Value::String(other.to_string()),
    }
}

/// Converts a single non-null cell. Values that fail to parse stay as text.
pub(crate) fn convert_value(column: &ColumnInfo, raw: String) -> Value {
    let parsed = match column.data_type.to_lowercase().as_str() {
        "fixed" => Some(convert_fixed(column.scale, &raw)),
        "real" => raw.parse::<f64>().ok().map(Value::Float),
        "boolean" => parse_bool(&raw).map(Value::Bool),
        "text" => None,
        "binary" => decode_hex(&raw).map(Value::Bytes),
        "date" => parse_date(&raw).map(Value::Date),
        "time" => parse_time(&raw).map(Value::Time),
        "timestamp_ntz" => parse_epoch(&raw).and_then(|(secs, nanos)| {
            DateTime::from_timestamp(secs, nanos).map(|ts| Value::Timestamp(ts.naive_utc()))
        }),
        "timestamp_ltz" => parse_epoch(&raw).and_then(|(secs, nanos)| {
            DateTime::from_timestamp(secs, nanos).map(|ts| Value::TimestampTz(ts.fixed_offset()))
        }),
        "timestamp_tz" => parse_timestamp_tz(&raw).map(Value::TimestampTz),
        "variant" | "object" | "array" => serde_json::from_str(&raw).ok().map(Value::Json),
        _ => None,
    };

    parsed.unwrap_or(Value::String(raw))
}

fn convert_fixed(scale: Option<i64>, raw: &str) -> Value {
    match scale {
        Some(scale) if scale > 0 => Value::Decimal(raw.to_string()),
        _ => raw
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Decimal(raw.to_string())),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }

    (0..raw.len())
        .step_by(2)
        .map(|i| raw.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let days: i32 = raw.parse().ok()?;
    NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_DAYS_FROM_CE.checked_add(days)?)
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let (secs, nanos) = parse_epoch(raw)?;
    NaiveTime::from_num_seconds_from_midnight_opt(u32::try_from(secs).ok()?, nanos)
}

fn parse_timestamp_tz(raw: &str) -> Option<DateTime<FixedOffset>> {
    let (epoch, offset) = raw.split_once(' ')?;
    let (secs, nanos) = parse_epoch(epoch)?;
    let offset_minutes: i32 = offset.trim().parse().ok()?;
    let offset_secs = offset_minutes
        .checked_sub(TZ_OFFSET_BIAS_MINUTES)?
        .checked_mul(60)?;
    let offset = FixedOffset::east_opt(offset_secs)?;

    DateTime::from_timestamp(secs, nanos).map(|ts| ts.with_timezone(&offset))
}

/// Splits `[-]seconds[.fraction]` into whole seconds and a non-negative
/// nanosecond part, flooring negative values (`-1.5` is `(-2, 500_000_000)`).
fn parse_epoch(raw: &str) -> Option<(i64, u32)> {
    let raw = raw.trim();
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = whole.parse().ok()?;
    let nanos: i64 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}").parse().ok()?
    };

    if !negative || nanos == 0 {
        let secs = if negative { whole.checked_neg()? } else { whole };
        return Some((secs, nanos as u32));
    }

    Some((whole.checked_neg()?.checked_sub(1)?, (1_000_000_000 - nanos) as u32))
}
