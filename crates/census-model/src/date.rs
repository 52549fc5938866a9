//! `DD.MM.YYYY` wire dates.

use chrono::NaiveDate;

/// chrono format string for the wire representation.
pub const WIRE_FORMAT: &str = "%d.%m.%Y";

/// A `birth_date` that matched `DD.MM.YYYY` but is not a real calendar day
/// (e.g. `31.02.2020`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a valid calendar date (at {location})")]
pub struct DateError {
    pub location: String,
    pub value: String,
}

pub fn parse_wire_date(value: &str, location: &str) -> Result<NaiveDate, DateError> {
    NaiveDate::parse_from_str(value, WIRE_FORMAT).map_err(|_| DateError {
        location: location.to_string(),
        value: value.to_string(),
    })
}

pub fn format_wire_date(date: NaiveDate) -> String {
    date.format(WIRE_FORMAT).to_string()
}

/// serde adapter: `#[serde(with = "crate::date::wire")]`.
pub mod wire {
    use chrono::NaiveDate;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_wire_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&raw, super::WIRE_FORMAT).map_err(de::Error::custom)
    }
}
