//! The document-store seam.
//!
//! One document per import, holding that import's citizens. Every operation
//! is scoped to a single import; callers hold the import's lock around any
//! sequence of calls that must be observed as one step.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use census_model::{Citizen, CitizenId, CitizenPatch, ImportId, RelativeOp};

use crate::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDocument {
    pub import_id: ImportId,
    pub citizens: Vec<Citizen>,
}

#[async_trait]
pub trait ImportStore: Send + Sync {
    /// Number of imports stored so far.
    async fn count_imports(&self) -> Result<u64, StoreError>;

    /// Insert a new import. `false` means the write was not acknowledged
    /// (for instance the id is already taken).
    async fn insert_import(&self, document: ImportDocument) -> Result<bool, StoreError>;

    /// Current relatives of one citizen, `None` if the import or citizen is absent.
    async fn find_citizen_relatives(
        &self,
        import_id: ImportId,
        citizen_id: CitizenId,
    ) -> Result<Option<BTreeSet<CitizenId>>, StoreError>;

    /// The subset of `citizen_ids` present in the import, `None` if the import is absent.
    async fn find_existing_citizens(
        &self,
        import_id: ImportId,
        citizen_ids: &BTreeSet<CitizenId>,
    ) -> Result<Option<BTreeSet<CitizenId>>, StoreError>;

    /// Add or remove `target` in the relatives of every citizen in `others`.
    /// Returns how many citizens were actually modified.
    async fn bulk_update_relatives(
        &self,
        import_id: ImportId,
        op: RelativeOp,
        target: CitizenId,
        others: &BTreeSet<CitizenId>,
    ) -> Result<usize, StoreError>;

    /// Set the patched fields and return the post-update citizen.
    async fn update_citizen_fields(
        &self,
        import_id: ImportId,
        citizen_id: CitizenId,
        patch: &CitizenPatch,
    ) -> Result<Option<Citizen>, StoreError>;

    /// All citizens of an import in insertion order.
    async fn find_all_citizens(&self, import_id: ImportId)
        -> Result<Option<Vec<Citizen>>, StoreError>;
}
