//! Census storage layer
//!
//! Everything between validated input and persisted import documents:
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌──────────────────┐
//! │ HTTP handler │──►│ CitizenService  │──►│ dyn ImportStore  │
//! └──────────────┘   │  validate       │   │  (MemoryStore +  │
//!                    │  lock (keyed)   │   │   JSON snapshot) │
//!                    │  diff + apply   │   └──────────────────┘
//!                    └─────────────────┘
//! ```
//!
//! - **Keyed locks**: one key serializes import creation, one key per import
//!   serializes all reads and writes of its citizens.
//! - **Validate then commit**: every client error is found before the first
//!   write; relative targets are checked against the store before any
//!   relation edit.
//! - **Reports**: birthday and age-percentile reports are cached per import
//!   and dropped by patches that change their inputs.

pub mod config;
pub mod locks;
pub mod memory;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

use census_model::{CitizenId, ImportId, ValidationError};

pub use config::StorageConfig;
pub use locks::{LockKey, LockRegistry};
pub use memory::MemoryStore;
pub use service::CitizenService;
pub use store::{ImportDocument, ImportStore};

// ============================================================================
// Errors
// ============================================================================

/// Failure of the storage engine itself.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("write was not acknowledged by the store")]
    NotAcknowledged,
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Coarse error classes, used by transports to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    InvalidInput,
    NotFound,
    Store,
    Inconsistent,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("import {0} not found")]
    ImportNotFound(ImportId),

    #[error("citizen {citizen_id} not found in import {import_id}")]
    CitizenNotFound {
        import_id: ImportId,
        citizen_id: CitizenId,
    },

    #[error("relatives {missing:?} of citizen {citizen_id} do not exist in import {import_id}")]
    UnknownRelatives {
        import_id: ImportId,
        citizen_id: CitizenId,
        missing: Vec<CitizenId>,
    },

    #[error(
        "relative update for citizen {citizen_id} modified {modified} of {expected} citizens; \
         the relation graph of import {import_id} may be inconsistent"
    )]
    RelationGraphInconsistent {
        import_id: ImportId,
        citizen_id: CitizenId,
        expected: usize,
        modified: usize,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    /// Stable error kind reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Invalid(e) => e.kind(),
            ServiceError::ImportNotFound(_) | ServiceError::CitizenNotFound { .. } => {
                "NotFoundError"
            }
            ServiceError::UnknownRelatives { .. } => "UnknownRelativeError",
            ServiceError::RelationGraphInconsistent { .. } => "RelationGraphInconsistent",
            ServiceError::Store(_) => "StoreError",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::Invalid(_) => ErrorClass::InvalidInput,
            ServiceError::ImportNotFound(_)
            | ServiceError::CitizenNotFound { .. }
            | ServiceError::UnknownRelatives { .. } => ErrorClass::NotFound,
            ServiceError::Store(_) => ErrorClass::Store,
            ServiceError::RelationGraphInconsistent { .. } => ErrorClass::Inconsistent,
        }
    }
}
