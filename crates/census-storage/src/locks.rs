//! Named async locks.
//!
//! Entries are created on first use and never removed. Guards are owned so
//! they can be held across `.await` points.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use census_model::ImportId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Serializes import-id assignment and insertion.
    ImportCreation,
    /// Serializes access to one import's citizens.
    Import(ImportId),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::ImportCreation => write!(f, "imports:create"),
            LockKey::Import(id) => write!(f, "imports:{id}"),
        }
    }
}

pub type ExclusiveGuard = OwnedRwLockWriteGuard<()>;
pub type SharedGuard = OwnedRwLockReadGuard<()>;

#[derive(Default)]
pub struct LockRegistry {
    locks: DashMap<LockKey, Arc<RwLock<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: LockKey) -> Arc<RwLock<()>> {
        Arc::clone(self.locks.entry(key).or_default().value())
    }

    pub async fn exclusive(&self, key: LockKey) -> ExclusiveGuard {
        let guard = self.handle(key).write_owned().await;
        tracing::trace!(lock = %key, "exclusive lock acquired");
        guard
    }

    pub async fn shared(&self, key: LockKey) -> SharedGuard {
        let guard = self.handle(key).read_owned().await;
        tracing::trace!(lock = %key, "shared lock acquired");
        guard
    }

    /// Number of distinct keys seen so far.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
