use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::{CacheKey, Status};

/// Kind of state transition a listener is notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    /// A fetch started.
    Loading,
    /// A fetch completed and replaced the data.
    Fetched,
    /// A fetch failed.
    Failed,
    /// Data was seeded from the persistent store.
    Seeded,
    /// The entry was marked stale.
    Invalidated,
    /// A mutation edited the data in place.
    Patched,
    /// The entry was removed.
    Evicted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: CacheKey,
    pub kind: CacheEventKind,
    pub status: Status,
    pub version: u64,
}

pub type Listener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<CacheKey, Vec<(u64, Listener)>>,
}

/// Per-key listener registry shared by a cache and its subscriptions.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    registry: Arc<Mutex<Registry>>,
}

impl Listeners {
    pub fn subscribe(&self, key: CacheKey, listener: Listener) -> Subscription {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .listeners
            .entry(key.clone())
            .or_default()
            .push((id, listener));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            key,
            id,
        }
    }

    /// Deliver events. Listeners run outside the registry lock so they may
    /// subscribe or unsubscribe from inside the callback.
    pub fn notify(&self, events: Vec<CacheEvent>) {
        for event in events {
            let targets: Vec<Listener> = {
                let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
                registry
                    .listeners
                    .get(&event.key)
                    .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
                    .unwrap_or_default()
            };
            for listener in targets {
                listener(&event);
            }
        }
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    key: CacheKey,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = registry.listeners.get_mut(&self.key) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                registry.listeners.remove(&self.key);
            }
        }
    }
}
