//! Custom scalars registered alongside generated types.

use async_graphql::Value;
use async_graphql::dynamic::Scalar;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Free-form JSON, used for `where` arguments and JSON attributes
pub const JSON: &str = "JSON";

/// Timestamps and calendar dates
pub const DATE: &str = "Date";

/// The `JSON` scalar. Accepts any value.
pub fn json_scalar() -> Scalar {
    Scalar::new(JSON)
        .description("The `JSON` scalar type represents raw JSON as input and output.")
        .specified_by_url("https://www.ecma-international.org/publications-and-standards/standards/ecma-404/")
}

/// The `Date` scalar. Accepts RFC 3339 timestamps, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD`.
pub fn date_scalar() -> Scalar {
    Scalar::new(DATE)
        .description("A date or timestamp")
        .validator(is_date)
}

fn is_date(value: &Value) -> bool {
    match value {
        Value::String(s) => parse_date(s).is_some(),
        _ => false,
    }
}

/// Parse any accepted date format into a UTC timestamp
pub fn parse_date(raw: &str) -> Option<DateTime<chrono::Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&chrono::Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
