//! Validate-then-convert entrypoints for raw JSON payloads.
//!
//! Order is fixed: schema first (short-circuits), then calendar dates, then
//! relational invariants. Conversion from `Value` never runs on input that
//! failed the schema.

use serde::Deserialize;
use serde_json::Value;

use crate::citizen::{Citizen, CitizenId, CitizenPatch, Gender};
use crate::date::parse_wire_date;
use crate::relations::{validate_patch_relatives, validate_relations};
use crate::schema::{self, SchemaError, SchemaErrorKind, ROOT};
use crate::ValidationError;

#[derive(Deserialize)]
struct WireImport {
    citizens: Vec<WireCitizen>,
}

#[derive(Deserialize)]
struct WireCitizen {
    citizen_id: CitizenId,
    town: String,
    street: String,
    building: String,
    apartment: u64,
    name: String,
    birth_date: String,
    gender: Gender,
    relatives: Vec<CitizenId>,
}

#[derive(Deserialize)]
struct WirePatch {
    town: Option<String>,
    street: Option<String>,
    building: Option<String>,
    apartment: Option<u64>,
    name: Option<String>,
    birth_date: Option<String>,
    gender: Option<Gender>,
    relatives: Option<Vec<CitizenId>>,
}

/// Full import validation: schema, dates, then the batch invariants.
pub fn parse_import(payload: &Value) -> Result<Vec<Citizen>, ValidationError> {
    schema::validate_import(payload)?;
    let wire = WireImport::deserialize(payload).map_err(malformed)?;

    let citizens = wire
        .citizens
        .into_iter()
        .enumerate()
        .map(|(index, c)| -> Result<Citizen, ValidationError> {
            let location = format!("{ROOT}.citizens[{index}].birth_date");
            Ok(Citizen {
                citizen_id: c.citizen_id,
                town: c.town,
                street: c.street,
                building: c.building,
                apartment: c.apartment,
                name: c.name,
                birth_date: parse_wire_date(&c.birth_date, &location)?,
                gender: c.gender,
                relatives: c.relatives,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    validate_relations(&citizens)?;
    Ok(citizens)
}

/// Full patch validation for `citizen_id`: schema, date, then the
/// self/duplicate checks on a new relative list.
///
/// Whether the new relatives exist is a question for the store.
pub fn parse_patch(citizen_id: CitizenId, payload: &Value) -> Result<CitizenPatch, ValidationError> {
    schema::validate_patch(payload)?;
    let wire = WirePatch::deserialize(payload).map_err(malformed)?;

    let birth_date = match wire.birth_date {
        Some(raw) => Some(parse_wire_date(&raw, &format!("{ROOT}.birth_date"))?),
        None => None,
    };
    if let Some(relatives) = &wire.relatives {
        validate_patch_relatives(citizen_id, relatives)?;
    }

    Ok(CitizenPatch {
        town: wire.town,
        street: wire.street,
        building: wire.building,
        apartment: wire.apartment,
        name: wire.name,
        birth_date,
        gender: wire.gender,
        relatives: wire.relatives,
    })
}

fn malformed(err: serde_json::Error) -> SchemaError {
    SchemaError::new(ROOT, SchemaErrorKind::Malformed(err.to_string()))
}
