//! Backend timestamp encoding.
//!
//! The backend writes datetimes as `2024-01-02 15:04:05.123Z` and uses an empty
//! string for unset date fields. RFC 3339 input is accepted as well.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Canonical backend datetime format.
pub const BACKEND_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3fZ";

/// Parse a backend datetime. Empty input means "unset".
pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.fZ")
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

/// Format a datetime the way the backend stores it.
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.format(BACKEND_FORMAT).to_string()
}

/// Serde adapter for optional backend datetimes (`null` and `""` are `None`).
pub mod optional {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&format(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid datetime {s:?}"))),
        }
    }
}

/// Deserialize optional strings where the backend uses `""` for "unset".
pub fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(T::from))
}

/// Deserialize a JSON list that the backend may send as `null`.
pub fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let raw: Option<Vec<T>> = Option::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default())
}
