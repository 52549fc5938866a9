//! Service-level tests over the in-memory store

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tempfile::tempdir;

use census_model::{Citizen, CitizenId, CitizenPatch, ImportId, RelativeOp};

use super::*;

fn raw_citizen(citizen_id: CitizenId, town: &str, birth_date: &str, relatives: &[CitizenId]) -> Value {
    json!({
        "citizen_id": citizen_id,
        "town": town,
        "street": "Льва Толстого",
        "building": "16к7стр5",
        "apartment": 7,
        "name": "Иванов Иван Иванович",
        "birth_date": birth_date,
        "gender": "male",
        "relatives": relatives
    })
}

/// Citizens 1 and 2 are relatives, 3 has none.
fn sample_import() -> Value {
    json!({ "citizens": [
        raw_citizen(1, "Москва", "26.12.1986", &[2]),
        raw_citizen(2, "Москва", "01.04.1997", &[1]),
        raw_citizen(3, "Керчь", "23.11.1986", &[]),
    ]})
}

fn test_service() -> CitizenService {
    CitizenService::new(Arc::new(MemoryStore::new()))
}

fn relatives_of(citizens: &[Citizen], citizen_id: CitizenId) -> Vec<CitizenId> {
    let mut relatives = citizens
        .iter()
        .find(|c| c.citizen_id == citizen_id)
        .map(|c| c.relatives.clone())
        .unwrap_or_default();
    relatives.sort_unstable();
    relatives
}

fn assert_symmetric(citizens: &[Citizen]) {
    for citizen in citizens {
        for &relative in &citizen.relatives {
            assert!(
                relatives_of(citizens, relative).contains(&citizen.citizen_id),
                "{} lists {} but not the reverse",
                citizen.citizen_id,
                relative
            );
        }
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 6, 15).unwrap()
}

// ----------------------------------------------------------------------------
// Imports
// ----------------------------------------------------------------------------

#[tokio::test]
async fn import_ids_are_sequential() {
    let service = test_service();
    assert_eq!(service.create_import(&sample_import()).await.unwrap(), 0);
    assert_eq!(service.create_import(&sample_import()).await.unwrap(), 1);

    let citizens = service.list_citizens(1).await.unwrap();
    assert_eq!(citizens.len(), 3);
    assert_eq!(citizens[0].citizen_id, 1);
}

#[tokio::test]
async fn rejected_import_is_not_stored() {
    let service = test_service();
    let bad = json!({ "citizens": [raw_citizen(1, "Москва", "01.01.2000", &[2])] });

    let err = service.create_import(&bad).await.unwrap_err();
    assert_eq!(err.kind(), "UnknownRelativeError");
    assert_eq!(err.class(), ErrorClass::InvalidInput);

    assert_eq!(service.create_import(&sample_import()).await.unwrap(), 0);
}

#[tokio::test]
async fn empty_import_is_accepted() {
    let service = test_service();
    let id = service.create_import(&json!({ "citizens": [] })).await.unwrap();
    assert!(service.list_citizens(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn listing_unknown_import_is_not_found() {
    let service = test_service();
    let err = service.list_citizens(42).await.unwrap_err();
    assert!(matches!(err, ServiceError::ImportNotFound(42)));
    assert_eq!(err.class(), ErrorClass::NotFound);
}

// ----------------------------------------------------------------------------
// Patches
// ----------------------------------------------------------------------------

#[tokio::test]
async fn patching_fields_returns_updated_citizen() {
    let service = test_service();
    let id = service.create_import(&sample_import()).await.unwrap();

    let updated = service
        .patch_citizen(id, 3, &json!({ "name": "Иванова Мария Леонидовна", "town": "Москва" }))
        .await
        .unwrap();
    assert_eq!(updated.name, "Иванова Мария Леонидовна");
    assert_eq!(updated.town, "Москва");
    assert_eq!(updated.street, "Льва Толстого");

    let stored = service.list_citizens(id).await.unwrap();
    assert_eq!(stored[2], updated);
}

#[tokio::test]
async fn patching_relatives_mirrors_both_sides() {
    let service = test_service();
    let id = service.create_import(&sample_import()).await.unwrap();

    // 2: [1] -> [3]
    let updated = service
        .patch_citizen(id, 2, &json!({ "relatives": [3] }))
        .await
        .unwrap();
    assert_eq!(updated.relatives, vec![3]);

    let citizens = service.list_citizens(id).await.unwrap();
    assert_eq!(relatives_of(&citizens, 1), Vec::<CitizenId>::new());
    assert_eq!(relatives_of(&citizens, 2), vec![3]);
    assert_eq!(relatives_of(&citizens, 3), vec![2]);
    assert_symmetric(&citizens);

    // clearing removes the back-references too
    service
        .patch_citizen(id, 3, &json!({ "relatives": [] }))
        .await
        .unwrap();
    let citizens = service.list_citizens(id).await.unwrap();
    assert!(citizens.iter().all(|c| c.relatives.is_empty()));
}

#[tokio::test]
async fn unchanged_relatives_are_a_no_op() {
    let service = test_service();
    let id = service.create_import(&sample_import()).await.unwrap();
    let before = service.list_citizens(id).await.unwrap();

    service
        .patch_citizen(id, 1, &json!({ "relatives": [2] }))
        .await
        .unwrap();
    assert_eq!(service.list_citizens(id).await.unwrap(), before);
}

#[tokio::test]
async fn unknown_relative_leaves_import_untouched() {
    let service = test_service();
    let id = service.create_import(&sample_import()).await.unwrap();
    let before = service.list_citizens(id).await.unwrap();

    let err = service
        .patch_citizen(id, 1, &json!({ "relatives": [3, 99], "name": "Петров Пётр" }))
        .await
        .unwrap_err();
    match &err {
        ServiceError::UnknownRelatives { missing, .. } => assert_eq!(missing, &vec![99]),
        other => panic!("expected unknown relatives, got {other:?}"),
    }
    assert_eq!(err.class(), ErrorClass::NotFound);
    assert_eq!(service.list_citizens(id).await.unwrap(), before);
}

#[tokio::test]
async fn patch_validation_errors_are_client_errors() {
    let service = test_service();
    let id = service.create_import(&sample_import()).await.unwrap();

    for (payload, kind) in [
        (json!({}), "SchemaError"),
        (json!({ "citizen_id": 5 }), "SchemaError"),
        (json!({ "birth_date": "31.02.2000" }), "DateError"),
        (json!({ "relatives": [1] }), "SelfRelationError"),
        (json!({ "relatives": [2, 2] }), "DuplicateRelativeError"),
    ] {
        let err = service.patch_citizen(id, 1, &payload).await.unwrap_err();
        assert_eq!(err.kind(), kind, "payload {payload}");
        assert_eq!(err.class(), ErrorClass::InvalidInput);
    }
}

#[tokio::test]
async fn patching_missing_citizen_or_import_is_not_found() {
    let service = test_service();
    let id = service.create_import(&sample_import()).await.unwrap();

    let err = service
        .patch_citizen(id, 77, &json!({ "name": "Никто" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::CitizenNotFound { citizen_id: 77, .. }));

    let err = service
        .patch_citizen(id, 77, &json!({ "relatives": [1] }))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::CitizenNotFound { citizen_id: 77, .. }));

    for payload in [json!({ "relatives": [] }), json!({ "name": "Никто" })] {
        let err = service.patch_citizen(9, 1, &payload).await.unwrap_err();
        assert!(matches!(err, ServiceError::ImportNotFound(9)), "payload {payload}: {err:?}");
        assert_eq!(err.kind(), "NotFoundError");
    }
}

// ----------------------------------------------------------------------------
// Concurrency
// ----------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_imports_get_distinct_ids() {
    let service = Arc::new(test_service());
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.create_import(&sample_import()).await })
        })
        .collect();

    let mut ids = BTreeSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap());
    }
    assert_eq!(ids, (0..16).collect::<BTreeSet<ImportId>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_relative_patches_stay_symmetric() {
    let service = Arc::new(test_service());
    let citizens: Vec<Value> = (1..=8)
        .map(|id| raw_citizen(id, "Москва", "01.01.1990", &[]))
        .collect();
    let id = service
        .create_import(&json!({ "citizens": citizens }))
        .await
        .unwrap();

    let handles: Vec<_> = (1..=8u64)
        .flat_map(|citizen| {
            let service = Arc::clone(&service);
            let relatives: Vec<CitizenId> = (1..=8).filter(|&r| r != citizen && (r + citizen) % 3 != 0).collect();
            let first = tokio::spawn({
                let service = Arc::clone(&service);
                let relatives = relatives.clone();
                async move {
                    service
                        .patch_citizen(id, citizen, &json!({ "relatives": relatives }))
                        .await
                }
            });
            let second = tokio::spawn(async move {
                service
                    .patch_citizen(id, citizen, &json!({ "relatives": relatives[..relatives.len() / 2] }))
                    .await
            });
            [first, second]
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_symmetric(&service.list_citizens(id).await.unwrap());
}

// ----------------------------------------------------------------------------
// Reports
// ----------------------------------------------------------------------------

#[tokio::test]
async fn birthdays_report_counts_relatives() {
    let service = test_service();
    let id = service.create_import(&sample_import()).await.unwrap();

    let report = service.birthdays(id).await.unwrap();
    // 1 is born in December, so 2 buys one present then; and vice versa in April.
    assert_eq!(report.month(12)[0].citizen_id, 2);
    assert_eq!(report.month(4)[0].citizen_id, 1);
    assert!(report.month(11).is_empty());

    assert!(matches!(
        service.birthdays(5).await.unwrap_err(),
        ServiceError::ImportNotFound(5)
    ));
}

#[tokio::test]
async fn birthdays_cache_survives_unrelated_patches() {
    let service = test_service();
    let id = service.create_import(&sample_import()).await.unwrap();

    let first = service.birthdays(id).await.unwrap();
    service
        .patch_citizen(id, 3, &json!({ "town": "Тверь", "name": "Сидоров" }))
        .await
        .unwrap();
    let second = service.birthdays(id).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    service
        .patch_citizen(id, 3, &json!({ "relatives": [1] }))
        .await
        .unwrap();
    let third = service.birthdays(id).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    // 3 is born in November, 1 now buys a present then.
    assert_eq!(third.month(11)[0].citizen_id, 1);
}

#[tokio::test]
async fn percentiles_follow_town_and_birth_date_changes() {
    let service = test_service();
    let id = service.create_import(&sample_import()).await.unwrap();

    let first = service.age_percentiles(id, today()).await.unwrap();
    let towns: Vec<&str> = first.iter().map(|t| t.town.as_str()).collect();
    assert_eq!(towns, ["Керчь", "Москва"]);

    service
        .patch_citizen(id, 1, &json!({ "relatives": [] }))
        .await
        .unwrap();
    assert!(Arc::ptr_eq(
        &first,
        &service.age_percentiles(id, today()).await.unwrap()
    ));

    service
        .patch_citizen(id, 3, &json!({ "town": "Москва" }))
        .await
        .unwrap();
    let moved = service.age_percentiles(id, today()).await.unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].town, "Москва");

    let tomorrow = today().succ_opt().unwrap();
    let next_day = service.age_percentiles(id, tomorrow).await.unwrap();
    assert!(!Arc::ptr_eq(&moved, &next_day));
}

// ----------------------------------------------------------------------------
// Persistence
// ----------------------------------------------------------------------------

#[tokio::test]
async fn snapshot_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        data_path: Some(dir.path().join("data").join("imports.json")),
    };

    let service = config.open_service().unwrap();
    let id = service.create_import(&sample_import()).await.unwrap();
    service
        .patch_citizen(id, 2, &json!({ "relatives": [3], "apartment": 12 }))
        .await
        .unwrap();
    let expected = service.list_citizens(id).await.unwrap();
    drop(service);

    let reopened = config.open_service().unwrap();
    assert_eq!(reopened.list_citizens(id).await.unwrap(), expected);
    assert_eq!(reopened.create_import(&sample_import()).await.unwrap(), 1);
}

#[tokio::test]
async fn failed_snapshot_write_leaves_state_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("imports.json");
    let service = CitizenService::new(Arc::new(MemoryStore::open(&path).unwrap()));
    let id = service.create_import(&sample_import()).await.unwrap();
    let before = service.list_citizens(id).await.unwrap();

    // A directory in the temp file's place makes every snapshot write fail.
    let blocker = dir.path().join("imports.json.tmp");
    std::fs::create_dir(&blocker).unwrap();

    let err = service
        .patch_citizen(id, 3, &json!({ "name": "Сидоров" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Store(StoreError::Io(_))), "{err:?}");

    let err = service
        .patch_citizen(id, 3, &json!({ "relatives": [1] }))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Store);

    let err = service.create_import(&sample_import()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Store);

    let after = service.list_citizens(id).await.unwrap();
    assert_eq!(after, before);
    assert_symmetric(&after);
    assert!(matches!(
        service.list_citizens(1).await.unwrap_err(),
        ServiceError::ImportNotFound(1)
    ));

    std::fs::remove_dir(&blocker).unwrap();
    service
        .patch_citizen(id, 3, &json!({ "relatives": [1] }))
        .await
        .unwrap();
    let reopened = CitizenService::new(Arc::new(MemoryStore::open(&path).unwrap()));
    let citizens = reopened.list_citizens(id).await.unwrap();
    assert_eq!(relatives_of(&citizens, 1), vec![2, 3]);
    assert_eq!(relatives_of(&citizens, 3), vec![1]);
}

#[test]
fn corrupt_snapshot_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("imports.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        MemoryStore::open(&path),
        Err(StoreError::Encoding(_))
    ));
}

// ----------------------------------------------------------------------------
// Store failures
// ----------------------------------------------------------------------------

/// Delegates to a [`MemoryStore`] but can refuse inserts, drop relative
/// edits or fail every removal.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    refuse_inserts: bool,
    drop_relative_updates: bool,
    fail_removals: bool,
}

#[async_trait]
impl ImportStore for FaultyStore {
    async fn count_imports(&self) -> Result<u64, StoreError> {
        self.inner.count_imports().await
    }

    async fn insert_import(&self, document: ImportDocument) -> Result<bool, StoreError> {
        if self.refuse_inserts {
            return Ok(false);
        }
        self.inner.insert_import(document).await
    }

    async fn find_citizen_relatives(
        &self,
        import_id: ImportId,
        citizen_id: CitizenId,
    ) -> Result<Option<BTreeSet<CitizenId>>, StoreError> {
        self.inner.find_citizen_relatives(import_id, citizen_id).await
    }

    async fn find_existing_citizens(
        &self,
        import_id: ImportId,
        citizen_ids: &BTreeSet<CitizenId>,
    ) -> Result<Option<BTreeSet<CitizenId>>, StoreError> {
        self.inner.find_existing_citizens(import_id, citizen_ids).await
    }

    async fn bulk_update_relatives(
        &self,
        import_id: ImportId,
        op: RelativeOp,
        target: CitizenId,
        others: &BTreeSet<CitizenId>,
    ) -> Result<usize, StoreError> {
        if self.drop_relative_updates {
            return Ok(0);
        }
        if self.fail_removals && op == RelativeOp::Remove {
            return Err(StoreError::Io(std::io::Error::other("removal refused")));
        }
        self.inner
            .bulk_update_relatives(import_id, op, target, others)
            .await
    }

    async fn update_citizen_fields(
        &self,
        import_id: ImportId,
        citizen_id: CitizenId,
        patch: &CitizenPatch,
    ) -> Result<Option<Citizen>, StoreError> {
        self.inner
            .update_citizen_fields(import_id, citizen_id, patch)
            .await
    }

    async fn find_all_citizens(
        &self,
        import_id: ImportId,
    ) -> Result<Option<Vec<Citizen>>, StoreError> {
        self.inner.find_all_citizens(import_id).await
    }
}

#[tokio::test]
async fn unacknowledged_insert_is_a_store_error() {
    let service = CitizenService::new(Arc::new(FaultyStore {
        refuse_inserts: true,
        ..FaultyStore::default()
    }));
    let err = service.create_import(&sample_import()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Store(StoreError::NotAcknowledged)));
    assert_eq!(err.class(), ErrorClass::Store);
}

#[tokio::test]
async fn short_relative_update_is_reported_as_inconsistent() {
    let service = CitizenService::new(Arc::new(FaultyStore {
        drop_relative_updates: true,
        ..FaultyStore::default()
    }));
    let id = service.create_import(&sample_import()).await.unwrap();

    let err = service
        .patch_citizen(id, 3, &json!({ "relatives": [1, 2], "name": "Сидоров" }))
        .await
        .unwrap_err();
    match err {
        ServiceError::RelationGraphInconsistent {
            expected, modified, ..
        } => {
            assert_eq!(expected, 2);
            assert_eq!(modified, 0);
        }
        other => panic!("expected inconsistency, got {other:?}"),
    }

    // the field update is skipped once the relative edits fall short
    let citizens = service.list_citizens(id).await.unwrap();
    let third = citizens.iter().find(|c| c.citizen_id == 3).unwrap();
    assert_eq!(third.name, "Иванов Иван Иванович");
    assert!(third.relatives.is_empty());
}

#[tokio::test]
async fn store_failure_after_partial_relative_edit_is_inconsistent() {
    let service = CitizenService::new(Arc::new(FaultyStore {
        fail_removals: true,
        ..FaultyStore::default()
    }));
    let id = service.create_import(&sample_import()).await.unwrap();
    let cached = service.birthdays(id).await.unwrap();

    // 2: [1] -> [3]; the add lands, the removal fails
    let err = service
        .patch_citizen(id, 2, &json!({ "relatives": [3], "name": "Сидоров" }))
        .await
        .unwrap_err();
    match &err {
        ServiceError::RelationGraphInconsistent {
            expected, modified, ..
        } => {
            assert_eq!(*expected, 2);
            assert_eq!(*modified, 1);
        }
        other => panic!("expected inconsistency, got {other:?}"),
    }
    assert_eq!(err.class(), ErrorClass::Inconsistent);

    let citizens = service.list_citizens(id).await.unwrap();
    assert_eq!(relatives_of(&citizens, 3), vec![2]);
    assert_eq!(relatives_of(&citizens, 2), vec![1]);
    assert_eq!(citizens[1].name, "Иванов Иван Иванович");

    // the birthdays report reflects the partial edit, not the old graph
    let report = service.birthdays(id).await.unwrap();
    assert!(!Arc::ptr_eq(&cached, &report));
    assert!(report.month(4).iter().any(|entry| entry.citizen_id == 3));

    // a store failure before any edit stays a plain store error
    let err = service
        .patch_citizen(id, 1, &json!({ "relatives": [] }))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Store(StoreError::Io(_))));
}

#[tokio::test]
async fn lock_registry_tracks_touched_imports() {
    let service = test_service();
    let id = service.create_import(&sample_import()).await.unwrap();
    service.list_citizens(id).await.unwrap();
    // imports:create and imports:0
    assert_eq!(service.locks().len(), 2);
}
