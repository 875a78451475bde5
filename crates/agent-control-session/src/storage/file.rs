//! JSON file location history.
//!
//! Layout: `<root>/<device_id>/location_history.json`, holding a JSON array of
//! records oldest first. Appends are read-modify-write, serialized by a single
//! mutex, and land through a temp file plus rename.

use std::path::{Path, PathBuf};

use agent_control_core::{LocationRecord, LocationStore, StoreError};
use async_trait::async_trait;
use tokio::{fs, sync::Mutex};

use super::validate_device_id;

const HISTORY_FILE: &str = "location_history.json";

/// Location store persisting one JSON file per device.
pub struct JsonFileLocationStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileLocationStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn history_path(&self, device_id: &str) -> PathBuf {
        self.root.join(device_id).join(HISTORY_FILE)
    }

    /// Load a history file. A missing file is an empty history; a corrupt
    /// one is logged and treated as empty so new fixes are not lost.
    async fn load(path: &Path) -> Result<Vec<LocationRecord>, StoreError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        match serde_json::from_slice(&bytes) {
            Ok(records) => Ok(records),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "corrupt location history, starting fresh: {e}"
                );
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl LocationStore for JsonFileLocationStore {
    async fn append_location(
        &self,
        device_id: &str,
        record: LocationRecord,
    ) -> Result<(), StoreError> {
        validate_device_id(device_id)?;
        let path = self.history_path(device_id);

        let _guard = self.write_lock.lock().await;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut records = Self::load(&path).await?;
        records.push(record);

        let json = serde_json::to_vec_pretty(&records)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json).await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!(device_id, count = records.len(), "location history written");
        Ok(())
    }

    async fn history(&self, device_id: &str) -> Result<Vec<LocationRecord>, StoreError> {
        validate_device_id(device_id)?;
        Self::load(&self.history_path(device_id)).await
    }
}
