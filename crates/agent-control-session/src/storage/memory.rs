//! In-memory location history.

use std::{collections::HashMap, sync::RwLock};

use agent_control_core::{LocationRecord, LocationStore, StoreError};
use async_trait::async_trait;

use super::validate_device_id;

/// In-memory location store.
///
/// Useful for development and tests. Data is lost on restart.
#[derive(Default)]
pub struct MemoryLocationStore {
    histories: RwLock<HashMap<String, Vec<LocationRecord>>>,
}

impl MemoryLocationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn append_location(
        &self,
        device_id: &str,
        record: LocationRecord,
    ) -> Result<(), StoreError> {
        validate_device_id(device_id)?;
        self.histories
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .entry(device_id.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn history(&self, device_id: &str) -> Result<Vec<LocationRecord>, StoreError> {
        validate_device_id(device_id)?;
        Ok(self
            .histories
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(device_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(latitude: f64) -> LocationRecord {
        LocationRecord {
            latitude,
            longitude: 0.5,
            accuracy: 10.0,
            source_timestamp: "2024-05-01T12:00:00Z".into(),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = MemoryLocationStore::new();
        store.append_location("d1", record(1.0)).await.unwrap();
        store.append_location("d1", record(2.0)).await.unwrap();
        store.append_location("d2", record(3.0)).await.unwrap();

        let history = store.history("d1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!((history[1].latitude - 2.0).abs() < f64::EPSILON);
        assert!(store.history("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_device_id() {
        let store = MemoryLocationStore::new();
        tokio_test::assert_err!(store.append_location("../etc", record(1.0)).await);
    }
}
