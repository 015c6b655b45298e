#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use wipecache_core::api::{Envelope, Operation, RemoteFetch, Request};
use wipecache_core::store::{MemoryStore, PersistentRecord, SharedStore, StoreBackend, StoreError};
use wipecache_core::{Collection, Dashboard, DemoGate};

pub const SCOPE: &str = "a@x.com";

/// In-process stand-in for the dashboard service.
///
/// Lists are served from per-collection fixtures. Create/update echo the
/// payload back and delete succeeds without data; all three also apply to
/// the fixtures, so a later list reflects them. Every call is recorded.
#[derive(Default)]
pub struct FakeRemote {
    lists: Mutex<HashMap<Collection, Value>>,
    failing: AtomicBool,
    gate: Option<Semaphore>,
    calls: Mutex<Vec<Request>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// List calls capture their response on arrival, then block until
    /// [`FakeRemote::release`] hands out a permit. Mutations are not gated.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    pub fn with_list(self: Arc<Self>, collection: Collection, list: Value) -> Arc<Self> {
        self.set_list(collection, list);
        self
    }

    pub fn set_list(&self, collection: Collection, list: Value) {
        self.lists.lock().unwrap().insert(collection, list);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn release(&self, permits: usize) {
        if let Some(ref gate) = self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn list_calls(&self, collection: Collection) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.operation == Operation::List && r.collection == collection)
            .count()
    }

    fn apply(&self, request: Request) -> Envelope {
        let Some(key) = request.target_key() else {
            return Envelope::failure("missing payload");
        };
        let field = request.collection.key_field();
        let mut lists = self.lists.lock().unwrap();
        let list = lists
            .entry(request.collection)
            .or_insert_with(|| Value::Array(Vec::new()));
        let Some(items) = list.as_array_mut() else {
            return Envelope::failure("corrupt fixture");
        };
        items.retain(|item| item.get(field).and_then(Value::as_str) != Some(key.as_str()));
        match (request.operation, request.payload) {
            (Operation::Delete, _) => Envelope::ok_empty(),
            (_, Some(entity)) => {
                items.push(entity.clone());
                Envelope::ok(entity)
            }
            (_, None) => Envelope::failure("missing payload"),
        }
    }

    pub fn list(&self, collection: Collection) -> Value {
        self.lists
            .lock()
            .unwrap()
            .get(&collection)
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()))
    }

    pub fn mutation_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.operation != Operation::List)
            .count()
    }
}

#[async_trait]
impl RemoteFetch for FakeRemote {
    async fn call(&self, request: Request) -> Envelope {
        self.calls.lock().unwrap().push(request.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Envelope::failure("service unavailable");
        }
        if request.operation != Operation::List {
            return self.apply(request);
        }

        let list = self
            .lists
            .lock()
            .unwrap()
            .get(&request.collection)
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        if let Some(ref gate) = self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        Envelope::ok(list)
    }
}

/// Memory backend that counts how often it is touched.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    pub loads: AtomicUsize,
    pub saves: AtomicUsize,
}

impl CountingStore {
    pub fn touches(&self) -> usize {
        self.loads.load(Ordering::SeqCst) + self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreBackend for CountingStore {
    async fn load(&self, partition: &str, scope: &str) -> Result<Option<PersistentRecord>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(partition, scope).await
    }

    async fn save(&self, record: &PersistentRecord) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(record).await
    }
}

pub fn memory_store() -> SharedStore {
    SharedStore::new(Arc::new(MemoryStore::new()))
}

pub fn dashboard(remote: Arc<FakeRemote>, store: SharedStore) -> Dashboard {
    Dashboard::builder(remote)
        .store(store)
        .demo(DemoGate::new(false))
        .build()
}

/// Let spawned background fetches run until they block.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
