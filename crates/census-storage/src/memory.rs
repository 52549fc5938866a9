//! In-process [`ImportStore`] with optional JSON snapshot persistence.
//!
//! Documents live in a `BTreeMap` behind a `parking_lot::RwLock`. When a
//! snapshot path is configured, every acknowledged write rewrites the
//! snapshot (temp file, then rename) before returning. Edits are made on a
//! copy of the document, so a failed snapshot write leaves readers on the
//! last persisted state.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use census_model::{Citizen, CitizenId, CitizenPatch, ImportId, RelativeOp};

use crate::store::{ImportDocument, ImportStore};
use crate::StoreError;

const SNAPSHOT_VERSION: &str = "census_snapshot_v1";

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: String,
    imports: Vec<ImportDocument>,
}

#[derive(Default)]
pub struct MemoryStore {
    imports: RwLock<BTreeMap<ImportId, ImportDocument>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// A volatile store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store persisted at `path`, loading the existing snapshot if any.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let imports = if path.exists() {
            let contents = fs::read_to_string(path)?;
            let snapshot: Snapshot = serde_json::from_str(&contents)?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unsupported snapshot version `{}`", snapshot.version),
                )));
            }
            snapshot
                .imports
                .into_iter()
                .map(|doc| (doc.import_id, doc))
                .collect()
        } else {
            BTreeMap::new()
        };

        tracing::info!(
            path = %path.display(),
            imports = imports.len(),
            "opened import snapshot"
        );
        Ok(Self {
            imports: RwLock::new(imports),
            snapshot_path: Some(path.to_path_buf()),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    fn persist(&self, imports: &BTreeMap<ImportId, ImportDocument>) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            imports: imports.values().cloned().collect(),
        };
        let json = serde_json::to_vec(&snapshot)?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), imports = imports.len(), "snapshot written");
        Ok(())
    }

    /// Swap `document` in and persist. If the snapshot write fails the
    /// previous version (or its absence) is restored before returning.
    fn commit(
        &self,
        imports: &mut BTreeMap<ImportId, ImportDocument>,
        document: ImportDocument,
    ) -> Result<(), StoreError> {
        let import_id = document.import_id;
        let previous = imports.insert(import_id, document);
        if let Err(err) = self.persist(imports) {
            match previous {
                Some(previous) => imports.insert(import_id, previous),
                None => imports.remove(&import_id),
            };
            tracing::warn!(import_id, error = %err, "snapshot write failed, edit rolled back");
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl ImportStore for MemoryStore {
    async fn count_imports(&self) -> Result<u64, StoreError> {
        Ok(self.imports.read().len() as u64)
    }

    async fn insert_import(&self, document: ImportDocument) -> Result<bool, StoreError> {
        let mut imports = self.imports.write();
        if imports.contains_key(&document.import_id) {
            tracing::warn!(import_id = document.import_id, "import id already taken");
            return Ok(false);
        }
        self.commit(&mut imports, document)?;
        Ok(true)
    }

    async fn find_citizen_relatives(
        &self,
        import_id: ImportId,
        citizen_id: CitizenId,
    ) -> Result<Option<BTreeSet<CitizenId>>, StoreError> {
        let imports = self.imports.read();
        Ok(imports.get(&import_id).and_then(|doc| {
            doc.citizens
                .iter()
                .find(|c| c.citizen_id == citizen_id)
                .map(|c| c.relatives.iter().copied().collect())
        }))
    }

    async fn find_existing_citizens(
        &self,
        import_id: ImportId,
        citizen_ids: &BTreeSet<CitizenId>,
    ) -> Result<Option<BTreeSet<CitizenId>>, StoreError> {
        let imports = self.imports.read();
        Ok(imports.get(&import_id).map(|doc| {
            doc.citizens
                .iter()
                .map(|c| c.citizen_id)
                .filter(|id| citizen_ids.contains(id))
                .collect()
        }))
    }

    async fn bulk_update_relatives(
        &self,
        import_id: ImportId,
        op: RelativeOp,
        target: CitizenId,
        others: &BTreeSet<CitizenId>,
    ) -> Result<usize, StoreError> {
        let mut imports = self.imports.write();
        let Some(mut doc) = imports.get(&import_id).cloned() else {
            return Ok(0);
        };

        let mut modified = 0;
        for citizen in doc
            .citizens
            .iter_mut()
            .filter(|c| others.contains(&c.citizen_id))
        {
            let changed = match op {
                RelativeOp::Add => {
                    if citizen.relatives.contains(&target) {
                        false
                    } else {
                        citizen.relatives.push(target);
                        true
                    }
                }
                RelativeOp::Remove => {
                    let before = citizen.relatives.len();
                    citizen.relatives.retain(|&id| id != target);
                    citizen.relatives.len() != before
                }
            };
            if changed {
                modified += 1;
            }
        }

        if modified > 0 {
            self.commit(&mut imports, doc)?;
        }
        Ok(modified)
    }

    async fn update_citizen_fields(
        &self,
        import_id: ImportId,
        citizen_id: CitizenId,
        patch: &CitizenPatch,
    ) -> Result<Option<Citizen>, StoreError> {
        let mut imports = self.imports.write();
        let Some(mut doc) = imports.get(&import_id).cloned() else {
            return Ok(None);
        };
        let Some(citizen) = doc
            .citizens
            .iter_mut()
            .find(|c| c.citizen_id == citizen_id)
        else {
            return Ok(None);
        };
        patch.apply_to(citizen);
        let updated = citizen.clone();
        self.commit(&mut imports, doc)?;
        Ok(Some(updated))
    }

    async fn find_all_citizens(
        &self,
        import_id: ImportId,
    ) -> Result<Option<Vec<Citizen>>, StoreError> {
        Ok(self
            .imports
            .read()
            .get(&import_id)
            .map(|doc| doc.citizens.clone()))
    }
}
