//! Census data model
//!
//! Types and pure logic for citizen imports:
//!
//! - `citizen`: the `Citizen` record and the typed `CitizenPatch`
//! - `schema`: structural validation of raw JSON payloads
//! - `date`: `DD.MM.YYYY` wire dates
//! - `relations`: cross-record invariants over a whole import batch
//! - `diff`: relative-set differences for single-citizen patches
//! - `payload`: the validate-then-convert entrypoints used by the service
//! - `analytics`: birthday presents and age percentiles
//!
//! Nothing in this crate touches storage or locks; every function is
//! deterministic over its inputs.

pub mod analytics;
pub mod citizen;
pub mod date;
pub mod diff;
pub mod payload;
pub mod relations;
pub mod schema;

pub use citizen::{Citizen, CitizenId, CitizenPatch, Gender, ImportId};
pub use date::DateError;
pub use diff::{compute_diff, RelativeOp, RelativesDiff};
pub use payload::{parse_import, parse_patch};
pub use relations::{validate_relations, RelationError};
pub use schema::{SchemaError, SchemaErrorKind};

/// Any defect in client-supplied data, detected before a mutation starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Date(#[from] DateError),
    #[error(transparent)]
    Relation(#[from] RelationError),
}

impl ValidationError {
    /// Stable error kind reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::Schema(_) => "SchemaError",
            ValidationError::Date(_) => "DateError",
            ValidationError::Relation(e) => e.kind(),
        }
    }
}
