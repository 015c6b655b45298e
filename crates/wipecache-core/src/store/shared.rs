use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{PersistentRecord, StoreBackend};

type PairKey = (String, String);

/// Fail-soft, write-serializing front for a [`StoreBackend`].
///
/// This is the store every cache instance shares. Reads never fail (errors
/// are logged and read as "nothing stored") and writes never report errors to
/// the caller. Writes to the same `(partition, scope)` are serialized through
/// a per-pair async mutex; [`SharedStore::write_guard`] exposes that lock so a
/// read-modify-write can run without losing a concurrent update.
#[derive(Clone)]
pub struct SharedStore {
    backend: Arc<dyn StoreBackend>,
    locks: Arc<Mutex<HashMap<PairKey, Arc<AsyncMutex<()>>>>>,
}

impl SharedStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persisted value for the pair, or `None` when absent or unreadable.
    pub async fn get(&self, partition: &str, scope: &str) -> Option<Value> {
        self.record(partition, scope).await.map(|r| r.value)
    }

    pub async fn record(&self, partition: &str, scope: &str) -> Option<PersistentRecord> {
        load_soft(self.backend.as_ref(), partition, scope).await
    }

    /// Overwrite the pair's value. Failures are logged, never returned.
    pub async fn put(&self, partition: &str, scope: &str, value: Value) {
        self.write_guard(partition, scope).await.put(value).await;
    }

    /// Read-modify-write under the pair's write lock.
    ///
    /// `edit` receives the current value (if any) and returns the value to
    /// store, or `None` to leave the record untouched. Returns whether a
    /// write happened.
    pub async fn modify<F>(&self, partition: &str, scope: &str, edit: F) -> bool
    where
        F: FnOnce(Option<Value>) -> Option<Value>,
    {
        self.write_guard(partition, scope).await.modify(edit).await
    }

    /// Human-readable age of the persisted record, e.g. "5m ago".
    pub async fn record_age(&self, partition: &str, scope: &str) -> Option<String> {
        self.record(partition, scope).await.map(|r| r.age_display())
    }

    /// Take the exclusive write lock for one `(partition, scope)` pair.
    pub async fn write_guard(&self, partition: &str, scope: &str) -> WriteGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                locks
                    .entry((partition.to_string(), scope.to_string()))
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = lock.lock_owned().await;
        WriteGuard {
            backend: Arc::clone(&self.backend),
            partition: partition.to_string(),
            scope: scope.to_string(),
            _guard: guard,
        }
    }
}

/// Exclusive write access to one `(partition, scope)` pair.
pub struct WriteGuard {
    backend: Arc<dyn StoreBackend>,
    partition: String,
    scope: String,
    _guard: OwnedMutexGuard<()>,
}

impl WriteGuard {
    pub async fn get(&self) -> Option<Value> {
        load_soft(self.backend.as_ref(), &self.partition, &self.scope)
            .await
            .map(|r| r.value)
    }

    pub async fn put(&self, value: Value) {
        let record = PersistentRecord::new(self.partition.as_str(), self.scope.as_str(), value);
        match self.backend.save(&record).await {
            Ok(()) => debug!(partition = %self.partition, scope = %self.scope, "Persisted"),
            Err(e) => warn!(
                partition = %self.partition,
                scope = %self.scope,
                error = %e,
                "Failed to persist record"
            ),
        }
    }

    /// Read-modify-write while holding the lock. See [`SharedStore::modify`].
    pub async fn modify<F>(&self, edit: F) -> bool
    where
        F: FnOnce(Option<Value>) -> Option<Value>,
    {
        match edit(self.get().await) {
            Some(next) => {
                self.put(next).await;
                true
            }
            None => false,
        }
    }
}

async fn load_soft(
    backend: &dyn StoreBackend,
    partition: &str,
    scope: &str,
) -> Option<PersistentRecord> {
    match backend.load(partition, scope).await {
        Ok(record) => record,
        Err(e) => {
            warn!(partition, scope, error = %e, "Failed to read persisted record");
            None
        }
    }
}
