//! Citizen operations over an [`ImportStore`].
//!
//! Writes to one import are serialized by its [`LockKey::Import`] lock;
//! report reads take the same lock shared so they never observe a half
//! applied relative update. Import creation is serialized separately because
//! ids are assigned from the current import count.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use serde_json::Value;

use census_model::analytics::{self, BirthdaysReport, TownAgePercentiles};
use census_model::{
    compute_diff, parse_import, parse_patch, Citizen, CitizenId, CitizenPatch, ImportId,
};

use crate::locks::{LockKey, LockRegistry};
use crate::store::{ImportDocument, ImportStore};
use crate::{ServiceError, StoreError};

type PercentileEntry = (NaiveDate, Arc<Vec<TownAgePercentiles>>);

pub struct CitizenService {
    store: Arc<dyn ImportStore>,
    locks: LockRegistry,
    birthdays_cache: DashMap<ImportId, Arc<BirthdaysReport>>,
    percentile_cache: DashMap<ImportId, PercentileEntry>,
}

impl CitizenService {
    pub fn new(store: Arc<dyn ImportStore>) -> Self {
        Self {
            store,
            locks: LockRegistry::new(),
            birthdays_cache: DashMap::new(),
            percentile_cache: DashMap::new(),
        }
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Validate a raw import payload and store it under a fresh id.
    pub async fn create_import(&self, payload: &Value) -> Result<ImportId, ServiceError> {
        let citizens = parse_import(payload)?;
        self.store_import(citizens).await
    }

    async fn store_import(&self, citizens: Vec<Citizen>) -> Result<ImportId, ServiceError> {
        let _guard = self.locks.exclusive(LockKey::ImportCreation).await;

        let import_id = self.store.count_imports().await?;
        let citizen_count = citizens.len();
        let acknowledged = self
            .store
            .insert_import(ImportDocument {
                import_id,
                citizens,
            })
            .await?;
        if !acknowledged {
            return Err(StoreError::NotAcknowledged.into());
        }

        tracing::info!(import_id, citizens = citizen_count, "import stored");
        Ok(import_id)
    }

    /// Validate a raw patch payload and apply it to one citizen, keeping
    /// relative lists symmetric. Returns the post-update citizen.
    pub async fn patch_citizen(
        &self,
        import_id: ImportId,
        citizen_id: CitizenId,
        payload: &Value,
    ) -> Result<Citizen, ServiceError> {
        let patch = parse_patch(citizen_id, payload)?;
        self.apply_patch(import_id, citizen_id, patch).await
    }

    async fn apply_patch(
        &self,
        import_id: ImportId,
        citizen_id: CitizenId,
        patch: CitizenPatch,
    ) -> Result<Citizen, ServiceError> {
        let _guard = self.locks.exclusive(LockKey::Import(import_id)).await;

        if let Some(relatives) = &patch.relatives {
            self.update_relatives(import_id, citizen_id, relatives)
                .await?;
        }

        let Some(updated) = self
            .store
            .update_citizen_fields(import_id, citizen_id, &patch)
            .await?
        else {
            return Err(self.not_found(import_id, citizen_id).await);
        };

        self.invalidate_reports(import_id, &patch);
        tracing::info!(import_id, citizen_id, "citizen patched");
        Ok(updated)
    }

    /// Mirror a new relative list of `citizen_id` onto the other side of
    /// each changed edge. Every target is checked before the first edit.
    async fn update_relatives(
        &self,
        import_id: ImportId,
        citizen_id: CitizenId,
        relatives: &[CitizenId],
    ) -> Result<(), ServiceError> {
        let Some(old) = self
            .store
            .find_citizen_relatives(import_id, citizen_id)
            .await?
        else {
            return Err(self.not_found(import_id, citizen_id).await);
        };
        let new: BTreeSet<CitizenId> = relatives.iter().copied().collect();

        let diff = compute_diff(&old, &new);
        if diff.is_empty() {
            tracing::debug!(import_id, citizen_id, "relatives unchanged");
            return Ok(());
        }

        let targets = diff.targets();
        let existing = self
            .store
            .find_existing_citizens(import_id, &targets)
            .await?
            .ok_or(ServiceError::ImportNotFound(import_id))?;
        if existing.len() < targets.len() {
            let missing: Vec<CitizenId> = targets.difference(&existing).copied().collect();
            tracing::warn!(import_id, citizen_id, ?missing, "patch names unknown relatives");
            return Err(ServiceError::UnknownRelatives {
                import_id,
                citizen_id,
                missing,
            });
        }

        // Dropped before the first edit: a failing step can leave partial edits behind.
        self.birthdays_cache.remove(&import_id);

        let mut modified = 0;
        for (op, others) in diff.operations() {
            match self
                .store
                .bulk_update_relatives(import_id, op, citizen_id, others)
                .await
            {
                Ok(count) => modified += count,
                Err(err) if modified > 0 => {
                    tracing::error!(
                        import_id,
                        citizen_id,
                        ?op,
                        modified,
                        error = %err,
                        "relative update failed part way"
                    );
                    return Err(ServiceError::RelationGraphInconsistent {
                        import_id,
                        citizen_id,
                        expected: targets.len(),
                        modified,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        if modified < targets.len() {
            tracing::error!(
                import_id,
                citizen_id,
                expected = targets.len(),
                modified,
                "relative update fell short"
            );
            return Err(ServiceError::RelationGraphInconsistent {
                import_id,
                citizen_id,
                expected: targets.len(),
                modified,
            });
        }

        tracing::debug!(
            import_id,
            citizen_id,
            added = diff.to_add.len(),
            removed = diff.to_remove.len(),
            "relatives mirrored"
        );
        Ok(())
    }

    /// A missing import and a missing citizen in an existing import are
    /// reported differently.
    async fn not_found(&self, import_id: ImportId, citizen_id: CitizenId) -> ServiceError {
        let ids = BTreeSet::from([citizen_id]);
        match self.store.find_existing_citizens(import_id, &ids).await {
            Ok(None) => ServiceError::ImportNotFound(import_id),
            Ok(Some(_)) => ServiceError::CitizenNotFound {
                import_id,
                citizen_id,
            },
            Err(err) => err.into(),
        }
    }

    fn invalidate_reports(&self, import_id: ImportId, patch: &CitizenPatch) {
        if patch.touches_relatives() || patch.touches_birth_date() {
            self.birthdays_cache.remove(&import_id);
        }
        if patch.touches_town() || patch.touches_birth_date() {
            self.percentile_cache.remove(&import_id);
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn list_citizens(&self, import_id: ImportId) -> Result<Vec<Citizen>, ServiceError> {
        let _guard = self.locks.shared(LockKey::Import(import_id)).await;
        self.load_citizens(import_id).await
    }

    async fn load_citizens(&self, import_id: ImportId) -> Result<Vec<Citizen>, ServiceError> {
        self.store
            .find_all_citizens(import_id)
            .await?
            .ok_or(ServiceError::ImportNotFound(import_id))
    }

    pub async fn birthdays(&self, import_id: ImportId) -> Result<Arc<BirthdaysReport>, ServiceError> {
        let _guard = self.locks.shared(LockKey::Import(import_id)).await;
        if let Some(cached) = self.birthdays_cache.get(&import_id) {
            return Ok(Arc::clone(cached.value()));
        }

        let citizens = self.load_citizens(import_id).await?;
        let report = Arc::new(analytics::birthdays(&citizens));
        self.birthdays_cache.insert(import_id, Arc::clone(&report));
        tracing::debug!(import_id, "birthdays report computed");
        Ok(report)
    }

    /// Age percentiles per town as of `today`. Cached per import and day.
    pub async fn age_percentiles(
        &self,
        import_id: ImportId,
        today: NaiveDate,
    ) -> Result<Arc<Vec<TownAgePercentiles>>, ServiceError> {
        let _guard = self.locks.shared(LockKey::Import(import_id)).await;
        if let Some(cached) = self.percentile_cache.get(&import_id) {
            let (computed_on, stats) = cached.value();
            if *computed_on == today {
                return Ok(Arc::clone(stats));
            }
        }

        let citizens = self.load_citizens(import_id).await?;
        let stats = Arc::new(analytics::age_percentiles(&citizens, today));
        self.percentile_cache
            .insert(import_id, (today, Arc::clone(&stats)));
        tracing::debug!(import_id, %today, towns = stats.len(), "age percentiles computed");
        Ok(stats)
    }
}
