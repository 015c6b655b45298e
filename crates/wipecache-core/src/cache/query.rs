use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::{CacheEntry, EntryInfo, FetchFuture, FetchOutcome, InFlight, QueryState, Status};
use super::handle::{Query, QuerySource};
use super::subscription::{CacheEvent, CacheEventKind, Listeners, Subscription};
use super::{CacheKey, FetchResult, Fetcher, KeyPattern, ReadOptions};
use crate::demo::{DemoDataset, DemoGate};
use crate::store::SharedStore;

/// Delay between read retries.
const READ_RETRY_DELAY_MS: u64 = 250;

/// How many times a read starts over after the fetch it waited on was
/// superseded before delivering any data.
const MAX_SUPERSEDED_REREADS: usize = 3;

/// In-memory, key-addressed cache of collections.
///
/// Reads fall through memory → persistent store → remote fetcher, serve stale
/// data while revalidating in the background, and coalesce concurrent fetches
/// of one key into a single call. Clones share the same state.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<CacheState>,
    store: SharedStore,
    demo: DemoGate,
    dataset: DemoDataset,
    listeners: Listeners,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    next_stamp: u64,
}

impl CacheState {
    /// Globally increasing stamp used for both generations and versions, so
    /// a re-created entry never reuses an old one.
    fn stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    /// Mark every derived view of `scope` stale. Derived views are computed
    /// from base collections, so any base change can affect them.
    fn invalidate_derived(&mut self, scope: &str, events: &mut Vec<CacheEvent>) {
        let keys: Vec<CacheKey> = self
            .entries
            .keys()
            .filter(|k| !k.is_base() && k.scope == scope)
            .cloned()
            .collect();
        for key in keys {
            let generation = self.stamp();
            if let Some(entry) = self.entries.get_mut(&key) {
                events.push(mark_invalidated(entry, generation));
            }
        }
    }
}

fn mark_invalidated(entry: &mut CacheEntry, generation: u64) -> CacheEvent {
    entry.invalidated = true;
    entry.generation = generation;
    entry.in_flight = None;
    if entry.status == Status::Loading {
        entry.status = if entry.data.is_some() {
            Status::Success
        } else {
            Status::Idle
        };
    }
    event(entry, CacheEventKind::Invalidated)
}

fn event(entry: &CacheEntry, kind: CacheEventKind) -> CacheEvent {
    CacheEvent {
        key: entry.key.clone(),
        kind,
        status: entry.status,
        version: entry.version,
    }
}

/// Data and version of an entry, read without fetching.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub data: Value,
    pub version: u64,
}

enum Lookup {
    Hit(QueryState<Value>),
    Wait(FetchFuture),
    Miss,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a finished fetch. Base keys are written through to the store
    /// while holding the pair's write lock, so a concurrent mutation is
    /// ordered strictly before or after this write.
    async fn complete(
        &self,
        key: &CacheKey,
        generation: u64,
        result: FetchResult,
        fallback: &Value,
    ) -> FetchOutcome {
        let guard = if key.is_base() {
            Some(
                self.store
                    .write_guard(key.collection.partition(), &key.scope)
                    .await,
            )
        } else {
            None
        };

        let mut events = Vec::new();
        let (outcome, persist) = {
            let mut state = self.lock_state();
            apply_fetch(&mut state, key, generation, result, fallback, &mut events)
        };
        self.listeners.notify(events);

        if let (Some(guard), Some(value)) = (guard, persist) {
            guard.put(value).await;
        }
        outcome
    }
}

fn apply_fetch(
    state: &mut CacheState,
    key: &CacheKey,
    generation: u64,
    result: FetchResult,
    fallback: &Value,
    events: &mut Vec<CacheEvent>,
) -> (FetchOutcome, Option<Value>) {
    let stamp = state.stamp();
    let Some(entry) = state.entries.get_mut(key) else {
        debug!(key = %key, "Discarding fetch for evicted entry");
        let outcome = FetchOutcome {
            state: QueryState::ready(fallback.clone()),
            discarded: true,
        };
        return (outcome, None);
    };
    if entry.generation != generation {
        debug!(key = %key, "Discarding superseded fetch");
        let outcome = FetchOutcome {
            state: entry.state(fallback),
            discarded: true,
        };
        return (outcome, None);
    }

    entry.in_flight = None;
    let (persist, changed) = match result {
        Ok(value) => {
            let changed = entry.data.as_ref() != Some(&value);
            if changed {
                entry.version = stamp;
            }
            entry.data = Some(value.clone());
            entry.status = Status::Success;
            entry.fetched_at = Some(Instant::now());
            entry.error = None;
            entry.invalidated = false;
            debug!(key = %key, changed, "Fetch complete");
            events.push(event(entry, CacheEventKind::Fetched));
            (key.is_base().then_some(value), changed)
        }
        Err(e) => {
            warn!(
                key = %key,
                error = %e,
                has_fallback = entry.data.is_some(),
                "Fetch failed, serving last known data"
            );
            entry.status = Status::Error;
            entry.error = Some(e.to_string());
            events.push(event(entry, CacheEventKind::Failed));
            (None, false)
        }
    };
    let outcome = FetchOutcome {
        state: entry.state(fallback),
        discarded: false,
    };

    if changed && key.is_base() {
        state.invalidate_derived(&key.scope, events);
    }
    (outcome, persist)
}

async fn fetch_with_retries(fetcher: &Fetcher, retries: u32, key: &CacheKey) -> FetchResult {
    let mut attempt = 0;
    loop {
        match fetcher().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                attempt += 1;
                debug!(key = %key, attempt, error = %e, "Fetch failed, retrying");
                tokio::time::sleep(Duration::from_millis(READ_RETRY_DELAY_MS)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

impl QueryCache {
    pub fn new(store: SharedStore, demo: DemoGate) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CacheState::default()),
                store,
                demo,
                dataset: DemoDataset,
                listeners: Listeners::default(),
            }),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub fn demo_gate(&self) -> &DemoGate {
        &self.inner.demo
    }

    // ===== Reads =====

    /// Typed read. See [`QueryCache::read_value`].
    pub async fn read<T: DeserializeOwned + Default>(
        &self,
        key: &CacheKey,
        fetcher: &Fetcher,
        options: &ReadOptions,
    ) -> QueryState<T> {
        self.read_value(key, fetcher, options).await.decode()
    }

    /// Typed read wrapped with a `refetch()` handle for consumers.
    pub async fn query<T: DeserializeOwned + Default>(
        &self,
        key: CacheKey,
        fetcher: Fetcher,
        options: ReadOptions,
    ) -> Query<T> {
        let state = self.read(&key, &fetcher, &options).await;
        Query::new(
            state,
            QuerySource {
                cache: self.clone(),
                key,
                fetcher,
                options,
            },
        )
    }

    /// Read one key.
    ///
    /// Demo data when the gate is active; otherwise fresh memory, then stale
    /// memory (refetching in the background), then the persistent store
    /// (refetching in the background), then an awaited fetch. Never fails:
    /// a failed fetch yields the last known value or `options.fallback`.
    pub async fn read_value(
        &self,
        key: &CacheKey,
        fetcher: &Fetcher,
        options: &ReadOptions,
    ) -> QueryState<Value> {
        if self.inner.demo.is_demo_mode() {
            debug!(key = %key, "Serving demo data");
            return QueryState::ready(self.inner.dataset.for_key(key));
        }

        for _ in 0..MAX_SUPERSEDED_REREADS {
            match self.lookup(key, fetcher, options) {
                Lookup::Hit(state) => return state,
                Lookup::Wait(future) => {
                    let outcome = future.await;
                    if !outcome.discarded {
                        return outcome.state;
                    }
                    continue;
                }
                Lookup::Miss => {}
            }

            if key.is_base() {
                let partition = key.collection.partition();
                if let Some(value) = self.inner.store.get(partition, &key.scope).await {
                    match self.seed(key, value, fetcher, options) {
                        Some(state) => return state,
                        // Populated while we were reading the store
                        None => continue,
                    }
                }
            }

            let outcome = self.attach_or_start(key, fetcher, options).await;
            if !outcome.discarded {
                return outcome.state;
            }
        }

        self.current_state(key, options)
    }

    /// Fetch from the remote now, bypassing staleness. Coalesces with a
    /// fetch already in flight for the key.
    pub async fn fetch(
        &self,
        key: &CacheKey,
        fetcher: &Fetcher,
        options: &ReadOptions,
    ) -> QueryState<Value> {
        if self.inner.demo.is_demo_mode() {
            return QueryState::ready(self.inner.dataset.for_key(key));
        }
        let outcome = self.attach_or_start(key, fetcher, options).await;
        if outcome.discarded {
            return self.read_value(key, fetcher, options).await;
        }
        outcome.state
    }

    /// Current data and version of a key without any I/O. Honours the demo
    /// gate; demo data always has version 0.
    pub fn snapshot(&self, key: &CacheKey) -> Option<Snapshot> {
        if self.inner.demo.is_demo_mode() {
            return Some(Snapshot {
                data: self.inner.dataset.for_key(key),
                version: 0,
            });
        }
        let state = self.inner.lock_state();
        let entry = state.entries.get(key)?;
        entry.data.as_ref().map(|data| Snapshot {
            data: data.clone(),
            version: entry.version,
        })
    }

    pub fn inspect(&self, key: &CacheKey) -> Option<EntryInfo> {
        let state = self.inner.lock_state();
        state.entries.get(key).map(|e| e.info(Instant::now()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &CacheKey, fetcher: &Fetcher, options: &ReadOptions) -> Lookup {
        let now = Instant::now();
        let mut events = Vec::new();
        let result = {
            let mut state = self.inner.lock_state();
            let Some(entry) = state.entries.get_mut(key) else {
                return Lookup::Miss;
            };
            entry.touch(now, options);

            if entry.data.is_none() {
                match entry.in_flight {
                    Some(ref in_flight) => {
                        debug!(key = %key, "Attaching to in-flight fetch");
                        Lookup::Wait(in_flight.future.clone())
                    }
                    None => Lookup::Miss,
                }
            } else {
                if entry.is_stale(now) && entry.in_flight.is_none() {
                    debug!(key = %key, "Serving stale data, revalidating in background");
                    let (_, started) = self.start_fetch(entry, fetcher, options);
                    events.push(started);
                } else {
                    debug!(key = %key, "Cache hit");
                }
                Lookup::Hit(entry.state(&options.fallback))
            }
        };
        self.inner.listeners.notify(events);
        result
    }

    /// Seed an empty entry from persisted data and revalidate it in the
    /// background. Returns `None` if the entry already had data.
    fn seed(
        &self,
        key: &CacheKey,
        value: Value,
        fetcher: &Fetcher,
        options: &ReadOptions,
    ) -> Option<QueryState<Value>> {
        let now = Instant::now();
        let mut events = Vec::new();
        let result = {
            let mut state = self.inner.lock_state();
            let version = state.stamp();
            let generation = state.stamp();
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(key.clone(), options, generation, now));
            if entry.data.is_some() {
                None
            } else {
                entry.touch(now, options);
                entry.data = Some(value);
                entry.version = version;
                entry.error = None;
                if entry.status != Status::Loading {
                    entry.status = Status::Success;
                }
                debug!(key = %key, "Seeded from persistent store");
                events.push(event(entry, CacheEventKind::Seeded));
                if entry.in_flight.is_none() {
                    let (_, started) = self.start_fetch(entry, fetcher, options);
                    events.push(started);
                }
                Some(entry.state(&options.fallback))
            }
        };
        self.inner.listeners.notify(events);
        result
    }

    async fn attach_or_start(
        &self,
        key: &CacheKey,
        fetcher: &Fetcher,
        options: &ReadOptions,
    ) -> FetchOutcome {
        let now = Instant::now();
        let mut events = Vec::new();
        let future = {
            let mut state = self.inner.lock_state();
            let generation = state.stamp();
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(key.clone(), options, generation, now));
            entry.touch(now, options);
            match entry.in_flight {
                Some(ref in_flight) => {
                    debug!(key = %key, "Attaching to in-flight fetch");
                    in_flight.future.clone()
                }
                None => {
                    let (future, started) = self.start_fetch(entry, fetcher, options);
                    events.push(started);
                    future
                }
            }
        };
        self.inner.listeners.notify(events);
        future.await
    }

    /// Start the single in-flight fetch for an entry. The fetch runs on its
    /// own task so it completes even if every waiting reader goes away.
    fn start_fetch(
        &self,
        entry: &mut CacheEntry,
        fetcher: &Fetcher,
        options: &ReadOptions,
    ) -> (FetchFuture, CacheEvent) {
        let generation = entry.generation;
        let inner = Arc::clone(&self.inner);
        let key = entry.key.clone();
        let fetcher = Arc::clone(fetcher);
        let retries = options.retries;
        let fallback = options.fallback.clone();

        let future = async move {
            let result = fetch_with_retries(&fetcher, retries, &key).await;
            inner.complete(&key, generation, result, &fallback).await
        }
        .boxed()
        .shared();
        tokio::spawn(future.clone());

        entry.in_flight = Some(InFlight {
            generation,
            future: future.clone(),
        });
        entry.status = Status::Loading;
        debug!(key = %entry.key, generation, "Fetch started");
        (future, event(entry, CacheEventKind::Loading))
    }

    fn current_state(&self, key: &CacheKey, options: &ReadOptions) -> QueryState<Value> {
        let state = self.inner.lock_state();
        match state.entries.get(key) {
            Some(entry) => entry.state(&options.fallback),
            None => QueryState::ready(options.fallback.clone()),
        }
    }

    // ===== Invalidation & eviction =====

    /// Mark every matching entry stale. Data is kept and served until the
    /// next fetch lands; any fetch already in flight for a matching entry
    /// is detached and its result will be discarded. Idempotent.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let mut events = Vec::new();
        let count = {
            let mut state = self.inner.lock_state();
            let keys: Vec<CacheKey> = state
                .entries
                .keys()
                .filter(|k| pattern.matches(k))
                .cloned()
                .collect();
            for key in &keys {
                let generation = state.stamp();
                if let Some(entry) = state.entries.get_mut(key) {
                    events.push(mark_invalidated(entry, generation));
                }
            }
            keys.len()
        };
        if count > 0 {
            debug!(?pattern, count, "Invalidated entries");
        }
        self.inner.listeners.notify(events);
        count
    }

    /// Remove an entry immediately, regardless of staleness.
    pub fn evict(&self, key: &CacheKey) -> bool {
        self.evict_matching(&KeyPattern::exact(key)) > 0
    }

    pub fn evict_matching(&self, pattern: &KeyPattern) -> usize {
        self.remove_where(|key, _| pattern.matches(key))
    }

    /// Drop entries whose retention window has elapsed since their last
    /// access. Entries with a fetch in flight are kept.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let removed = self.remove_where(|_, entry| entry.is_expired(now));
        if removed > 0 {
            debug!(removed, "Swept expired entries");
        }
        removed
    }

    /// Run [`QueryCache::sweep_expired`] every `period` until the cache is
    /// dropped.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                QueryCache { inner }.sweep_expired();
            }
        })
    }

    fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheKey, &CacheEntry) -> bool,
    {
        let events: Vec<CacheEvent> = {
            let mut state = self.inner.lock_state();
            let keys: Vec<CacheKey> = state
                .entries
                .iter()
                .filter(|(k, e)| predicate(k, e))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter()
                .filter_map(|k| state.entries.remove(k))
                .map(|mut entry| {
                    entry.status = Status::Idle;
                    event(&entry, CacheEventKind::Evicted)
                })
                .collect()
        };
        let count = events.len();
        self.inner.listeners.notify(events);
        count
    }

    // ===== Mutation support =====

    /// Edit an entry's data in place. `edit` returns whether it changed
    /// anything. A change bumps the entry's version and generation, so a
    /// fetch issued before the edit cannot overwrite it.
    pub fn patch<F>(&self, key: &CacheKey, edit: F) -> bool
    where
        F: FnOnce(&mut Value) -> bool,
    {
        let mut events = Vec::new();
        let patched = {
            let mut state = self.inner.lock_state();
            let version = state.stamp();
            let generation = state.stamp();
            let Some(entry) = state.entries.get_mut(key) else {
                return false;
            };
            let Some(data) = entry.data.as_mut() else {
                return false;
            };
            if !edit(data) {
                return false;
            }
            entry.version = version;
            entry.generation = generation;
            entry.in_flight = None;
            if entry.status != Status::Error {
                entry.status = Status::Success;
            }
            events.push(event(entry, CacheEventKind::Patched));
            if key.is_base() {
                state.invalidate_derived(&key.scope, &mut events);
            }
            true
        };
        self.inner.listeners.notify(events);
        patched
    }

    /// Apply the same in-place edit to the persisted record and the memory
    /// entry of a base key, under the pair's write lock.
    ///
    /// Any fetch issued before the edit is discarded when it completes. If
    /// the memory entry could not take the edit (no data yet, or the edit
    /// was a no-op against a list the fetch may replace), the entry is
    /// marked stale so the next read refetches.
    pub(crate) async fn apply_edit<F>(&self, key: &CacheKey, edit: F)
    where
        F: Fn(&mut Value) -> bool,
    {
        let guard = self
            .inner
            .store
            .write_guard(key.collection.partition(), &key.scope)
            .await;
        let persisted = guard
            .modify(|stored| {
                let mut stored = stored?;
                edit(&mut stored).then_some(stored)
            })
            .await;
        if !self.patch(key, |data| edit(data)) {
            self.supersede(key);
        }
        debug!(key = %key, persisted, "Applied edit");
    }

    /// Detach the entry's in-flight fetch and mark it stale.
    fn supersede(&self, key: &CacheKey) {
        let events: Vec<CacheEvent> = {
            let mut state = self.inner.lock_state();
            let generation = state.stamp();
            state
                .entries
                .get_mut(key)
                .map(|entry| mark_invalidated(entry, generation))
                .into_iter()
                .collect()
        };
        self.inner.listeners.notify(events);
    }

    // ===== Subscriptions =====

    /// Call `listener` on every state transition of `key` until the returned
    /// handle is dropped.
    pub fn subscribe<F>(&self, key: CacheKey, listener: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(key, Arc::new(listener))
    }
}
