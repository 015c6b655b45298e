use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{PersistentRecord, StoreBackend, StoreError};

/// In-process backend used by tests and demo runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), PersistentRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn load(
        &self,
        partition: &str,
        scope: &str,
    ) -> Result<Option<PersistentRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .get(&(partition.to_string(), scope.to_string()))
            .cloned())
    }

    async fn save(&self, record: &PersistentRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(
            (record.partition.clone(), record.scope.clone()),
            record.clone(),
        );
        Ok(())
    }
}
