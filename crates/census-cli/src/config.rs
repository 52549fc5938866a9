use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use census_storage::StorageConfig;

const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Server configuration
///
/// Read from an optional JSON file; command-line flags override it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address to bind the HTTP listener to
    pub listen: SocketAddr,
    /// `tracing` filter directive, used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Largest accepted request body; bigger ones get `413`
    pub max_body_bytes: usize,
    #[serde(flatten)]
    pub storage: StorageConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_filter: "info".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            storage: StorageConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config {}: {e}", path.display()))?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow!("invalid config {}: {e}", path.display()))
    }

    pub fn with_overrides(
        mut self,
        listen: Option<SocketAddr>,
        data_path: Option<PathBuf>,
        log_filter: Option<String>,
    ) -> Self {
        if let Some(listen) = listen {
            self.listen = listen;
        }
        if let Some(path) = data_path {
            self.storage.data_path = Some(path);
        }
        if let Some(filter) = log_filter {
            self.log_filter = filter;
        }
        self
    }
}
