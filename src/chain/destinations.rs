//! Sweep Destination Overrides
//!
//! Per-network addresses that receive confirmed deposits instead of the
//! hot wallet. Persisted as a JSON object `{ "NETWORK": "address" }`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::storage::StorageError;

#[derive(Clone, Default)]
pub struct SweepTargets {
    path: Option<PathBuf>,
    targets: Arc<RwLock<BTreeMap<String, String>>>,
}

impl SweepTargets {
    /// Unpersisted overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from `path`; a missing file means none
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let targets = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| StorageError::InvalidData(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::Database(format!("{}: {}", path.display(), e))),
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            targets: Arc::new(RwLock::new(targets)),
        })
    }

    pub async fn get(&self, network: &str) -> Option<String> {
        self.targets.read().await.get(&network.to_uppercase()).cloned()
    }

    /// Set (or with `None`, clear) the override of `network` and persist
    pub async fn set(&self, network: &str, address: Option<&str>) -> Result<(), StorageError> {
        let mut targets = self.targets.write().await;

        match address {
            Some(address) => {
                targets.insert(network.to_uppercase(), address.to_string());
            }
            None => {
                targets.remove(&network.to_uppercase());
            }
        }

        if let Some(path) = &self.path {
            let raw = serde_json::to_string_pretty(&*targets)
                .map_err(|e| StorageError::InvalidData(e.to_string()))?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            std::fs::write(path, raw)
                .map_err(|e| StorageError::Database(format!("{}: {}", path.display(), e)))?;
        }

        Ok(())
    }
}
