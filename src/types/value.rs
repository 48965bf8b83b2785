//! Typed column values: parsing from query text and JSON bodies, encoding back out.

use crate::types::kind::ColumnKind;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset};
use regex::Regex;
use serde_json::{Number, Value};
use std::sync::LazyLock;

static NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i:[+-]?(\d+(\.\d*)?|\.\d+)(e[+-]?\d+)?|nan)$").unwrap());

// ISO 8601 duration or PostgreSQL's verbose/clock interval input.
static INTERVAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?i:P(\d+(\.\d+)?[YMWD])*(T(\d+(\.\d+)?[HMS])+)?|@?\s*([+-]?\d+(\.\d+)?\s*[a-z]+\s*)*([+-]?\d+:\d{2}(:\d{2}(\.\d+)?)?)?(\s*ago)?)$",
    )
    .unwrap()
});

/// A value bound for one column. Produced by the request decoder, consumed by the compiler.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Decimal text, validated; kept as text to preserve precision.
    Numeric(String),
    Text(String),
    Uuid(uuid::Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeTz(NaiveTime, FixedOffset),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Interval(String),
    Json(Value),
    Array(Vec<SqlValue>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Parse one query-string value for a column of `kind`.
    pub fn parse_text(kind: &ColumnKind, s: &str) -> Result<SqlValue, String> {
        Ok(match kind {
            ColumnKind::Bool => match s.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" | "on" => SqlValue::Bool(true),
                "false" | "f" | "0" | "no" | "off" => SqlValue::Bool(false),
                _ => return Err(format!("'{}' is not a valid boolean", s)),
            },
            ColumnKind::Int(width) => {
                let n: i64 = s
                    .trim()
                    .parse()
                    .map_err(|_| format!("'{}' is not a valid integer", s))?;
                check_int_range(n, *width)?
            }
            ColumnKind::Float => SqlValue::Float(
                s.trim()
                    .parse()
                    .map_err(|_| format!("'{}' is not a valid number", s))?,
            ),
            ColumnKind::Numeric => {
                let t = s.trim();
                if !NUMERIC_RE.is_match(t) {
                    return Err(format!("'{}' is not a valid decimal", s));
                }
                SqlValue::Numeric(t.to_string())
            }
            ColumnKind::Text => SqlValue::Text(s.to_string()),
            ColumnKind::Char(n) => SqlValue::Text(pad_char(s, *n)?),
            ColumnKind::Uuid => SqlValue::Uuid(
                uuid::Uuid::parse_str(s.trim()).map_err(|_| format!("'{}' is not a valid uuid", s))?,
            ),
            ColumnKind::Date => SqlValue::Date(
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map_err(|_| format!("'{}' is not a valid date", s))?,
            ),
            ColumnKind::Time => SqlValue::Time(parse_time(s.trim())?),
            ColumnKind::TimeTz => {
                let (time, offset) = parse_time_tz(s.trim())?;
                SqlValue::TimeTz(time, offset)
            }
            ColumnKind::Timestamp => SqlValue::Timestamp(parse_timestamp(s.trim())?),
            ColumnKind::TimestampTz => SqlValue::TimestampTz(
                DateTime::parse_from_rfc3339(s.trim())
                    .map_err(|_| format!("'{}' is not an RFC 3339 timestamp with offset", s))?,
            ),
            ColumnKind::Interval => {
                let t = s.trim();
                if t.is_empty() || !INTERVAL_RE.is_match(t) {
                    return Err(format!("'{}' is not a valid interval", s));
                }
                SqlValue::Interval(t.to_string())
            }
            ColumnKind::Json => SqlValue::Json(
                serde_json::from_str(s).map_err(|e| format!("invalid JSON: {}", e))?,
            ),
            ColumnKind::Array(_) => {
                let v: Value = serde_json::from_str(s).map_err(|e| format!("invalid JSON array: {}", e))?;
                SqlValue::from_json(kind, &v)?
            }
            ColumnKind::Binary => return Err("binary columns are not supported".into()),
        })
    }

    /// Convert one JSON body value for a column of `kind`. Strings are accepted for scalar
    /// kinds and parsed as query text would be.
    pub fn from_json(kind: &ColumnKind, v: &Value) -> Result<SqlValue, String> {
        if v.is_null() {
            return Ok(SqlValue::Null);
        }
        if let Value::String(s) = v {
            if !matches!(kind, ColumnKind::Json | ColumnKind::Array(_)) {
                return SqlValue::parse_text(kind, s);
            }
        }
        Ok(match (kind, v) {
            (ColumnKind::Bool, Value::Bool(b)) => SqlValue::Bool(*b),
            (ColumnKind::Int(width), Value::Number(n)) => {
                let i = n.as_i64().ok_or_else(|| format!("{} is not an integer", n))?;
                check_int_range(i, *width)?
            }
            (ColumnKind::Float, Value::Number(n)) => {
                SqlValue::Float(n.as_f64().ok_or_else(|| format!("{} is not a number", n))?)
            }
            (ColumnKind::Numeric, Value::Number(n)) => SqlValue::Numeric(n.to_string()),
            (ColumnKind::Interval, Value::Number(n)) => SqlValue::Interval(format!("{} seconds", n)),
            (ColumnKind::Json, v) => SqlValue::Json(v.clone()),
            (ColumnKind::Array(elem), Value::Array(items)) => SqlValue::Array(
                items
                    .iter()
                    .map(|item| SqlValue::from_json(elem, item))
                    .collect::<Result<_, _>>()?,
            ),
            (kind, v) => return Err(format!("expected {}, got {}", kind, json_type_name(v))),
        })
    }

    /// JSON representation, as emitted in responses.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Int(n) => Value::Number((*n).into()),
            SqlValue::Float(f) => Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(float_text(*f))),
            SqlValue::Json(v) => v.clone(),
            SqlValue::Array(items) => Value::Array(items.iter().map(SqlValue::to_json).collect()),
            other => Value::String(other.scalar_text()),
        }
    }

    /// Query-string representation; `parse_text` reverses it.
    pub fn to_query_text(&self) -> String {
        match self {
            SqlValue::Json(v) => v.to_string(),
            SqlValue::Array(_) => self.to_json().to_string(),
            SqlValue::Null => String::new(),
            other => other.scalar_text(),
        }
    }

    /// Text handed to PostgreSQL for a `$n::<type>` parameter. `None` binds NULL.
    pub fn to_pg_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Json(v) => Some(v.to_string()),
            SqlValue::Array(items) => Some(array_literal(items)),
            SqlValue::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            other => Some(other.scalar_text()),
        }
    }

    fn scalar_text(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Int(n) => n.to_string(),
            SqlValue::Float(f) => float_text(*f),
            SqlValue::Numeric(s) | SqlValue::Text(s) | SqlValue::Interval(s) => s.clone(),
            SqlValue::Uuid(u) => u.to_string(),
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            SqlValue::TimeTz(t, offset) => format!("{}{}", t.format("%H:%M:%S%.f"), offset),
            SqlValue::Timestamp(ts) => ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            SqlValue::TimestampTz(ts) => ts.to_rfc3339(),
            SqlValue::Json(v) => v.to_string(),
            SqlValue::Array(items) => array_literal(items),
        }
    }
}

fn check_int_range(n: i64, width: crate::types::IntWidth) -> Result<SqlValue, String> {
    let (min, max) = width.bounds();
    if n < min || n > max {
        return Err(format!("{} is out of range [{}, {}]", n, min, max));
    }
    Ok(SqlValue::Int(n))
}

fn pad_char(s: &str, n: u32) -> Result<String, String> {
    let len = s.chars().count();
    if len > n as usize {
        return Err(format!("value is longer than {} characters", n));
    }
    Ok(format!("{:<width$}", s, width = n as usize))
}

fn float_text(f: f64) -> String {
    if f.is_nan() {
        "NaN".into()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else {
        f.to_string()
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("'{}' is not a valid time", s))
}

fn parse_time_tz(s: &str) -> Result<(NaiveTime, FixedOffset), String> {
    if let Some(time) = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        return Ok((parse_time(time)?, chrono::Utc.fix()));
    }
    let split = s
        .rfind(['+', '-'])
        .ok_or_else(|| format!("'{}' has no UTC offset", s))?;
    let (time, offset) = s.split_at(split);
    let offset = parse_offset(offset).ok_or_else(|| format!("'{}' has an invalid UTC offset", s))?;
    Ok((parse_time(time)?, offset))
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    let sign = if s.starts_with('-') { -1 } else { 1 };
    let digits: String = s[1..].chars().filter(|c| *c != ':').collect();
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| format!("'{}' is not a valid timestamp", s))
}

/// PostgreSQL array literal: `{"a","b",NULL}`.
fn array_literal(items: &[SqlValue]) -> String {
    let parts: Vec<String> = items
        .iter()
        .map(|item| match item {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Array(inner) => array_literal(inner),
            other => {
                let text = other.to_pg_text().unwrap_or_default();
                format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
            }
        })
        .collect();
    format!("{{{}}}", parts.join(","))
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntWidth;
    use serde_json::json;

    #[test]
    fn char_values_are_space_padded() {
        let v = SqlValue::parse_text(&ColumnKind::Char(5), "ab").unwrap();
        assert_eq!(v, SqlValue::Text("ab   ".into()));
        assert!(SqlValue::parse_text(&ColumnKind::Char(2), "abc").is_err());
    }

    #[test]
    fn timestamptz_requires_offset() {
        let v = SqlValue::parse_text(&ColumnKind::TimestampTz, "2021-03-04T05:06:07+02:00").unwrap();
        assert_eq!(v.to_query_text(), "2021-03-04T05:06:07+02:00");
        assert!(SqlValue::parse_text(&ColumnKind::TimestampTz, "2021-03-04T05:06:07").is_err());
    }

    #[test]
    fn non_digit_offsets_are_rejected() {
        assert!(SqlValue::parse_text(&ColumnKind::TimeTz, "10:00+1é1").is_err());
        assert!(SqlValue::parse_text(&ColumnKind::TimeTz, "10:00+é").is_err());
        assert!(SqlValue::parse_text(&ColumnKind::TimeTz, "10:00+0x30").is_err());
        assert!(SqlValue::from_json(&ColumnKind::TimeTz, &json!("10:00-ü:00")).is_err());
    }

    #[test]
    fn int_width_is_enforced() {
        let small = ColumnKind::Int(IntWidth::Small);
        assert!(SqlValue::from_json(&small, &json!(40000)).is_err());
        assert_eq!(SqlValue::from_json(&small, &json!("12")).unwrap(), SqlValue::Int(12));
    }

    #[test]
    fn query_text_round_trips() {
        let cases = [
            (ColumnKind::Bool, SqlValue::Bool(true)),
            (ColumnKind::Int(IntWidth::Big), SqlValue::Int(-9_007_199_254_740_993)),
            (ColumnKind::Int(IntWidth::Small), SqlValue::Int(-32768)),
            (ColumnKind::Float, SqlValue::Float(5.5)),
            (ColumnKind::Float, SqlValue::Float(0.1)),
            (ColumnKind::Text, SqlValue::Text(" spaced, \"quoted\" ".into())),
            (ColumnKind::Char(6), SqlValue::Text("ab    ".into())),
            (
                ColumnKind::Uuid,
                SqlValue::Uuid(uuid::Uuid::parse_str("0b8f4c1e-2d3a-4b5c-9d6e-7f8091a2b3c4").unwrap()),
            ),
            (ColumnKind::Date, SqlValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())),
            (ColumnKind::Time, SqlValue::Time(NaiveTime::from_hms_milli_opt(23, 59, 58, 250).unwrap())),
            (
                ColumnKind::Timestamp,
                SqlValue::Timestamp(
                    NaiveDate::from_ymd_opt(2021, 3, 4)
                        .unwrap()
                        .and_hms_micro_opt(5, 6, 7, 123_456)
                        .unwrap(),
                ),
            ),
            (
                ColumnKind::TimestampTz,
                SqlValue::TimestampTz(DateTime::parse_from_rfc3339("2021-03-04T05:06:07.5-03:30").unwrap()),
            ),
            (ColumnKind::Json, SqlValue::Json(json!({"a": [1, null, "x"], "b": {"c": true}}))),
            (ColumnKind::Numeric, SqlValue::Numeric("10.250".into())),
            (ColumnKind::Interval, SqlValue::Interval("1 day 02:00:00".into())),
            (
                ColumnKind::TimeTz,
                SqlValue::TimeTz(
                    NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
                    FixedOffset::east_opt(-5 * 3600).unwrap(),
                ),
            ),
            (
                ColumnKind::Array(Box::new(ColumnKind::Text)),
                SqlValue::Array(vec![SqlValue::Text("a".into()), SqlValue::Null]),
            ),
        ];
        for (kind, value) in cases {
            let text = value.to_query_text();
            assert_eq!(SqlValue::parse_text(&kind, &text).unwrap(), value, "{}", kind);
        }
    }

    #[test]
    fn array_literal_quotes_elements() {
        let v = SqlValue::Array(vec![
            SqlValue::Text("a\"b".into()),
            SqlValue::Null,
            SqlValue::Text("c,d".into()),
        ]);
        assert_eq!(v.to_pg_text().unwrap(), r#"{"a\"b",NULL,"c,d"}"#);
    }

    #[test]
    fn rejects_mismatched_json() {
        let err = SqlValue::from_json(&ColumnKind::Bool, &json!([1])).unwrap_err();
        assert_eq!(err, "expected bool, got array");
    }
}
