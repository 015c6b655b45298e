//! One-stop facade over the cache, mutation and metrics layers.
//!
//! Consumers ask a [`Dashboard`] for collections by scope and get back a
//! [`Query`] that is never empty-handed: cached, persisted or default data,
//! plus loading/error flags and a `refetch()` handle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use crate::api::{ApiError, RemoteFetch, Request};
use crate::cache::{fetcher, remote_fetcher, CacheKey, Fetcher, KeyPattern, Query, QueryCache, ReadOptions};
use crate::config::Config;
use crate::demo::{DemoGate, ENHANCED_VARIANT};
use crate::metrics::{MetricsEngine, MetricsPolicy};
use crate::models::{
    annotate_erasure_counts, AuditReport, Collection, DerivedMetrics, Entity, Machine, Subuser,
};
use crate::mutation::{Mutation, MutationCoordinator, MutationError, MutationOutcome};
use crate::store::{JsonFileStore, MemoryStore, SharedStore};

#[derive(Clone)]
pub struct Dashboard {
    remote: Arc<dyn RemoteFetch>,
    cache: QueryCache,
    mutations: MutationCoordinator,
    metrics: MetricsEngine,
    options: HashMap<Collection, ReadOptions>,
}

pub struct DashboardBuilder {
    remote: Arc<dyn RemoteFetch>,
    store: Option<SharedStore>,
    demo: Option<DemoGate>,
    options: HashMap<Collection, ReadOptions>,
    metrics_policy: MetricsPolicy,
    sweep_every: Option<Duration>,
}

impl DashboardBuilder {
    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist to JSON files under `dir`.
    pub fn store_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.store(SharedStore::new(Arc::new(JsonFileStore::new(dir))))
    }

    pub fn demo(mut self, demo: DemoGate) -> Self {
        self.demo = Some(demo);
        self
    }

    pub fn read_options(mut self, collection: Collection, options: ReadOptions) -> Self {
        self.options.insert(collection, options);
        self
    }

    pub fn metrics_policy(mut self, policy: MetricsPolicy) -> Self {
        self.metrics_policy = policy;
        self
    }

    /// Evict idle entries on a background task. Requires a tokio runtime
    /// at `build()`.
    pub fn sweep_every(mut self, period: Duration) -> Self {
        self.sweep_every = Some(period);
        self
    }

    pub fn build(self) -> Dashboard {
        let store = self
            .store
            .unwrap_or_else(|| SharedStore::new(Arc::new(MemoryStore::new())));
        let demo = self.demo.unwrap_or_default();
        let cache = QueryCache::new(store, demo);
        if let Some(period) = self.sweep_every {
            // Stops on its own once the cache is dropped
            drop(cache.spawn_sweeper(period));
        }

        Dashboard {
            mutations: MutationCoordinator::new(Arc::clone(&self.remote), cache.clone()),
            metrics: MetricsEngine::new(cache.clone(), self.metrics_policy),
            remote: self.remote,
            cache,
            options: self.options,
        }
    }
}

impl Dashboard {
    pub fn builder(remote: Arc<dyn RemoteFetch>) -> DashboardBuilder {
        DashboardBuilder {
            remote,
            store: None,
            demo: None,
            options: HashMap::new(),
            metrics_policy: MetricsPolicy::default(),
            sweep_every: None,
        }
    }

    /// Build from saved configuration: file store, demo flag, cache policies
    /// and metrics policy.
    pub fn from_config(config: &Config, remote: Arc<dyn RemoteFetch>) -> Result<Self> {
        let mut builder = Self::builder(remote)
            .store_dir(config.store_dir()?)
            .demo(DemoGate::new(config.demo_mode))
            .metrics_policy(config.metrics_policy());
        for collection in Collection::ALL {
            builder = builder.read_options(collection, config.read_options(collection));
        }
        Ok(builder.build())
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn demo_gate(&self) -> &DemoGate {
        self.cache.demo_gate()
    }

    pub fn metrics_engine(&self) -> &MetricsEngine {
        &self.metrics
    }

    pub fn read_options(&self, collection: Collection) -> ReadOptions {
        self.options
            .get(&collection)
            .cloned()
            .unwrap_or_else(|| ReadOptions::for_collection(collection))
    }

    // ===== Reads =====

    pub async fn machines(&self, scope: &str) -> Query<Vec<Machine>> {
        self.list(scope).await
    }

    pub async fn audit_reports(&self, scope: &str) -> Query<Vec<AuditReport>> {
        self.list(scope).await
    }

    pub async fn subusers(&self, scope: &str) -> Query<Vec<Subuser>> {
        self.list(scope).await
    }

    /// Machines annotated with how many audit reports name them.
    ///
    /// Composed from the cached machine and report collections, so it costs
    /// no extra network shape and refreshes whenever either base changes.
    pub async fn machines_enhanced(&self, scope: &str) -> Query<Vec<Machine>> {
        let key = CacheKey::new(Collection::Machines, scope).with_variant(ENHANCED_VARIANT);
        // The base reads already retry
        let options = self.read_options(Collection::Machines).retries(0);
        self.cache
            .query(key, self.enhanced_fetcher(scope), options)
            .await
    }

    /// Load both metric sources through the cache, then compute.
    pub async fn metrics(&self, scope: &str) -> DerivedMetrics {
        let (reports, machines) = futures::join!(self.audit_reports(scope), self.machines(scope));
        debug!(
            scope,
            reports = reports.data.len(),
            machines = machines.data.len(),
            "Metric sources loaded"
        );
        self.metrics.compute(scope)
    }

    async fn list<E: Entity>(&self, scope: &str) -> Query<Vec<E>> {
        let key = CacheKey::new(E::COLLECTION, scope);
        self.cache
            .query(key, self.list_fetcher::<E>(scope), self.read_options(E::COLLECTION))
            .await
    }

    /// Fetch a collection and re-encode it in canonical form, so legacy
    /// field names never reach the cache or the store. A payload that does
    /// not decode counts as a failed fetch.
    fn list_fetcher<E: Entity>(&self, scope: &str) -> Fetcher {
        let inner = remote_fetcher(
            Arc::clone(&self.remote),
            Request::list(E::COLLECTION, scope),
        );
        fetcher(move || {
            let inner = Arc::clone(&inner);
            async move {
                let raw = inner().await?;
                let items: Vec<E> = serde_json::from_value(raw).map_err(|e| {
                    ApiError::InvalidResponse(format!("{}: {}", E::COLLECTION.partition(), e))
                })?;
                serde_json::to_value(items).map_err(|e| ApiError::InvalidResponse(e.to_string()))
            }
        })
    }

    fn enhanced_fetcher(&self, scope: &str) -> Fetcher {
        let dashboard = self.clone();
        let scope = scope.to_string();
        fetcher(move || {
            let dashboard = dashboard.clone();
            let scope = scope.clone();
            async move {
                let (machines, reports) =
                    futures::join!(dashboard.machines(&scope), dashboard.audit_reports(&scope));
                let failure = [(machines.is_error, &machines.error), (reports.is_error, &reports.error)]
                    .into_iter()
                    .find_map(|(is_error, error)| is_error.then(|| error.clone().unwrap_or_default()));
                if let Some(message) = failure {
                    return Err(ApiError::Network(message));
                }
                let mut machines = machines.data;
                annotate_erasure_counts(&mut machines, &reports.data);
                serde_json::to_value(machines).map_err(|e| ApiError::InvalidResponse(e.to_string()))
            }
        })
    }

    // ===== Mutations =====

    pub async fn create_subuser(
        &self,
        scope: &str,
        subuser: Subuser,
    ) -> Result<MutationOutcome<Subuser>, MutationError> {
        self.mutations.mutate(scope, Mutation::Create(subuser)).await
    }

    pub async fn update_subuser(
        &self,
        scope: &str,
        subuser: Subuser,
    ) -> Result<MutationOutcome<Subuser>, MutationError> {
        self.mutations.mutate(scope, Mutation::Update(subuser)).await
    }

    pub async fn delete_subuser(
        &self,
        scope: &str,
        email: &str,
    ) -> Result<MutationOutcome<Subuser>, MutationError> {
        self.mutations
            .mutate(scope, Mutation::Delete(email.to_string()))
            .await
    }

    pub async fn update_machine(
        &self,
        scope: &str,
        machine: Machine,
    ) -> Result<MutationOutcome<Machine>, MutationError> {
        self.mutations.mutate(scope, Mutation::Update(machine)).await
    }

    // ===== Invalidation =====

    /// Mark everything cached for a scope stale, including metrics.
    /// Used on logout and account switch.
    pub fn invalidate_scope(&self, scope: &str) -> usize {
        let count = self.cache.invalidate(&KeyPattern::any_collection(scope));
        self.metrics.invalidate(scope);
        info!(scope, count, "Invalidated scope");
        count
    }

    /// Age of the persisted copy of a collection, e.g. "5m ago".
    pub async fn stored_age(&self, collection: Collection, scope: &str) -> Option<String> {
        self.cache
            .store()
            .record_age(collection.partition(), scope)
            .await
    }
}
