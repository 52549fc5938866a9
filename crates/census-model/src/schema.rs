//! Structural validation of import and patch payloads.
//!
//! The validators work on raw `serde_json::Value`s so every failure can name
//! the exact field and location. Locations use a small JSONPath-like syntax:
//! `$` for the payload root, `$.citizens[3].town` for a nested field.
//!
//! Check order inside one object is fixed so the reported error is
//! deterministic: object type, missing required fields (canonical order),
//! unexpected fields, then per-field value rules (canonical order). Array
//! elements are checked in order and the first failure wins.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::citizen::Gender;

pub const ROOT: &str = "$";

/// Every citizen field, in canonical order.
pub const CITIZEN_FIELDS: [&str; 9] = [
    "citizen_id",
    "town",
    "street",
    "building",
    "apartment",
    "name",
    "birth_date",
    "gender",
    "relatives",
];

/// Fields a patch may touch (everything but `citizen_id`).
pub const PATCH_FIELDS: [&str; 8] = [
    "town",
    "street",
    "building",
    "apartment",
    "name",
    "birth_date",
    "gender",
    "relatives",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} (at {location})")]
pub struct SchemaError {
    pub location: String,
    pub kind: SchemaErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaErrorKind {
    #[error("'{0}' is a required property")]
    MissingField(String),
    #[error("additional property '{0}' is not allowed")]
    UnexpectedField(String),
    #[error("{found} is not of type '{expected}'")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("{0} is less than the minimum of 0")]
    BelowMinimum(i64),
    #[error("string must not be empty")]
    EmptyString,
    #[error("'{0}' is not one of ['male', 'female']")]
    UnknownGender(String),
    #[error("'{0}' does not match 'DD.MM.YYYY'")]
    DatePattern(String),
    #[error("patch must contain at least one field")]
    EmptyPatch,
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl SchemaError {
    pub fn new(location: impl Into<String>, kind: SchemaErrorKind) -> Self {
        Self {
            location: location.into(),
            kind,
        }
    }

    /// The field the error is about, when there is one.
    pub fn field(&self) -> Option<&str> {
        match &self.kind {
            SchemaErrorKind::MissingField(f) | SchemaErrorKind::UnexpectedField(f) => Some(f),
            _ => self
                .location
                .rsplit('.')
                .next()
                .filter(|last| *last != ROOT)
                .map(|last| last.split('[').next().unwrap_or(last)),
        }
    }
}

/// Validate a `{"citizens": [...]}` import payload.
pub fn validate_import(payload: &Value) -> Result<(), SchemaError> {
    let root = expect_object(payload, ROOT)?;
    require_exactly(root, ROOT, &["citizens"])?;

    let location = child(ROOT, "citizens");
    let citizens = root["citizens"]
        .as_array()
        .ok_or_else(|| wrong_type(&location, "array", &root["citizens"]))?;

    for (index, citizen) in citizens.iter().enumerate() {
        let location = format!("{location}[{index}]");
        let object = expect_object(citizen, &location)?;
        require_exactly(object, &location, &CITIZEN_FIELDS)?;
        for field in CITIZEN_FIELDS {
            check_field(&location, field, &object[field])?;
        }
    }
    Ok(())
}

/// Validate a citizen patch payload: a non-empty subset of `PATCH_FIELDS`.
pub fn validate_patch(payload: &Value) -> Result<(), SchemaError> {
    let root = expect_object(payload, ROOT)?;
    if root.is_empty() {
        return Err(SchemaError::new(ROOT, SchemaErrorKind::EmptyPatch));
    }
    if let Some(extra) = root.keys().find(|k| !PATCH_FIELDS.contains(&k.as_str())) {
        return Err(SchemaError::new(
            ROOT,
            SchemaErrorKind::UnexpectedField(extra.clone()),
        ));
    }
    for field in PATCH_FIELDS {
        if let Some(value) = root.get(field) {
            check_field(ROOT, field, value)?;
        }
    }
    Ok(())
}

fn check_field(parent: &str, field: &str, value: &Value) -> Result<(), SchemaError> {
    let location = child(parent, field);
    match field {
        "citizen_id" | "apartment" => check_non_negative_integer(&location, value),
        "town" | "street" | "building" | "name" => check_non_empty_string(&location, value),
        "birth_date" => {
            let raw = expect_string(&location, value)?;
            if date_pattern().is_match(raw) {
                Ok(())
            } else {
                Err(SchemaError::new(
                    location,
                    SchemaErrorKind::DatePattern(raw.to_string()),
                ))
            }
        }
        "gender" => {
            let raw = expect_string(&location, value)?;
            match Gender::parse(raw) {
                Some(_) => Ok(()),
                None => Err(SchemaError::new(
                    location,
                    SchemaErrorKind::UnknownGender(raw.to_string()),
                )),
            }
        }
        "relatives" => {
            let items = value
                .as_array()
                .ok_or_else(|| wrong_type(&location, "array", value))?;
            for (index, item) in items.iter().enumerate() {
                check_non_negative_integer(&format!("{location}[{index}]"), item)?;
            }
            Ok(())
        }
        other => Err(SchemaError::new(
            parent,
            SchemaErrorKind::UnexpectedField(other.to_string()),
        )),
    }
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{2}\.\d{2}\.\d{4}$").expect("static date pattern"))
}

fn require_exactly(
    object: &Map<String, Value>,
    location: &str,
    fields: &[&str],
) -> Result<(), SchemaError> {
    if let Some(missing) = fields.iter().find(|f| !object.contains_key(**f)) {
        return Err(SchemaError::new(
            location,
            SchemaErrorKind::MissingField(missing.to_string()),
        ));
    }
    if let Some(extra) = object.keys().find(|k| !fields.contains(&k.as_str())) {
        return Err(SchemaError::new(
            location,
            SchemaErrorKind::UnexpectedField(extra.clone()),
        ));
    }
    Ok(())
}

fn expect_object<'a>(value: &'a Value, location: &str) -> Result<&'a Map<String, Value>, SchemaError> {
    value
        .as_object()
        .ok_or_else(|| wrong_type(location, "object", value))
}

fn expect_string<'a>(location: &str, value: &'a Value) -> Result<&'a str, SchemaError> {
    value
        .as_str()
        .ok_or_else(|| wrong_type(location, "string", value))
}

fn check_non_empty_string(location: &str, value: &Value) -> Result<(), SchemaError> {
    if expect_string(location, value)?.is_empty() {
        return Err(SchemaError::new(location, SchemaErrorKind::EmptyString));
    }
    Ok(())
}

fn check_non_negative_integer(location: &str, value: &Value) -> Result<(), SchemaError> {
    if value.is_u64() {
        return Ok(());
    }
    match value.as_i64() {
        Some(negative) => Err(SchemaError::new(
            location,
            SchemaErrorKind::BelowMinimum(negative),
        )),
        None => Err(wrong_type(location, "integer", value)),
    }
}

fn wrong_type(location: &str, expected: &'static str, found: &Value) -> SchemaError {
    SchemaError::new(
        location,
        SchemaErrorKind::WrongType {
            expected,
            found: json_type_name(found),
        },
    )
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child(parent: &str, field: &str) -> String {
    format!("{parent}.{field}")
}
