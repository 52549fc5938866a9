use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::memory::MemoryStore;
use crate::service::CitizenService;
use crate::StoreError;

/// Storage configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot file; `None` keeps everything in memory
    pub data_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn open_store(&self) -> Result<MemoryStore, StoreError> {
        match &self.data_path {
            Some(path) => MemoryStore::open(path),
            None => Ok(MemoryStore::new()),
        }
    }

    /// Open the configured store and wrap it in a service.
    pub fn open_service(&self) -> Result<CitizenService, StoreError> {
        Ok(CitizenService::new(Arc::new(self.open_store()?)))
    }
}
