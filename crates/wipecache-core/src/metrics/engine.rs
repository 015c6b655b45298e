use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{aggregate, MetricsPolicy};
use crate::cache::{CacheKey, QueryCache};
use crate::models::{AuditReport, Collection, DerivedMetrics, Machine};

struct Memo {
    metrics: DerivedMetrics,
    reports_version: u64,
    machines_version: u64,
    computed_at: Instant,
}

/// Computes [`DerivedMetrics`] from what the query cache already holds.
///
/// Never fetches. Results are memoized per scope and reused until either
/// source collection changes version, the policy's window elapses, or the
/// scope is invalidated.
#[derive(Clone)]
pub struct MetricsEngine {
    cache: QueryCache,
    policy: MetricsPolicy,
    memo: Arc<Mutex<HashMap<String, Memo>>>,
}

impl MetricsEngine {
    pub fn new(cache: QueryCache, policy: MetricsPolicy) -> Self {
        Self {
            cache,
            policy,
            memo: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn policy(&self) -> &MetricsPolicy {
        &self.policy
    }

    pub fn compute(&self, scope: &str) -> DerivedMetrics {
        let reports = self
            .cache
            .snapshot(&CacheKey::new(Collection::AuditReports, scope));
        let machines = self
            .cache
            .snapshot(&CacheKey::new(Collection::Machines, scope));
        let (Some(reports), Some(machines)) = (reports, machines) else {
            debug!(scope, "Metrics sources not loaded yet");
            return DerivedMetrics::empty(scope);
        };

        let now = Instant::now();
        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = memo.get(scope) {
            let unchanged = cached.reports_version == reports.version
                && cached.machines_version == machines.version;
            let fresh = now.saturating_duration_since(cached.computed_at) < self.policy.stale_after;
            if unchanged && fresh {
                debug!(scope, "Metrics memo hit");
                return cached.metrics.clone();
            }
        }

        let report_list: Vec<AuditReport> = decode_list(scope, Collection::AuditReports, reports.data);
        let machine_list: Vec<Machine> = decode_list(scope, Collection::Machines, machines.data);
        let metrics = aggregate(scope, &report_list, &machine_list, &self.policy, Utc::now());
        debug!(
            scope,
            reports = report_list.len(),
            months = metrics.months.len(),
            "Computed metrics"
        );

        memo.insert(
            scope.to_string(),
            Memo {
                metrics: metrics.clone(),
                reports_version: reports.version,
                machines_version: machines.version,
                computed_at: now,
            },
        );
        metrics
    }

    /// Force the next `compute` for the scope to recalculate.
    pub fn invalidate(&self, scope: &str) {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(scope);
    }
}

fn decode_list<T: DeserializeOwned>(scope: &str, collection: Collection, data: Value) -> Vec<T> {
    serde_json::from_value(data).unwrap_or_else(|e| {
        warn!(scope, %collection, error = %e, "Cached collection has unexpected shape");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{fetcher, Fetcher, ReadOptions};
    use crate::demo::DemoGate;
    use crate::store::{MemoryStore, SharedStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const SCOPE: &str = "a@x.com";

    fn engine() -> (MetricsEngine, QueryCache) {
        let cache = QueryCache::new(
            SharedStore::new(Arc::new(MemoryStore::new())),
            DemoGate::new(false),
        );
        (MetricsEngine::new(cache.clone(), MetricsPolicy::default()), cache)
    }

    fn fixed(value: Value) -> Fetcher {
        fetcher(move || {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    async fn load(cache: &QueryCache, collection: Collection, value: Value) {
        cache
            .read_value(
                &CacheKey::new(collection, SCOPE),
                &fixed(value),
                &ReadOptions::default(),
            )
            .await;
    }

    fn march_reports() -> Value {
        json!([
            {"reportId": "r1", "status": "Failed", "completedAt": "2025-03-02T09:00:00Z"},
            {"reportId": "r2", "status": "Completed", "completedAt": "2025-03-05T09:00:00Z"},
            {"reportId": "r3", "status": "Completed", "timestamp": "2025-03-09 09:00:00"},
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_until_both_sources_loaded() {
        let (engine, cache) = engine();
        assert!(!engine.compute(SCOPE).ready);

        load(&cache, Collection::AuditReports, march_reports()).await;
        let partial = engine.compute(SCOPE);
        assert!(!partial.ready);
        assert_eq!(partial, DerivedMetrics::empty(SCOPE));

        load(&cache, Collection::Machines, json!([])).await;
        let metrics = engine.compute(SCOPE);
        assert!(metrics.ready);
        assert_eq!(metrics.month("2025-03").unwrap().success_rate, "66.7%");
    }

    #[tokio::test(start_paused = true)]
    async fn test_memo_reused_until_source_changes() {
        let (engine, cache) = engine();
        load(&cache, Collection::AuditReports, march_reports()).await;
        load(&cache, Collection::Machines, json!([])).await;

        let first = engine.compute(SCOPE);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(engine.compute(SCOPE).computed_at, first.computed_at);

        let reports = CacheKey::new(Collection::AuditReports, SCOPE);
        cache.patch(&reports, |data| {
            if let Some(list) = data.as_array_mut() {
                list.push(json!({"reportId": "r4", "status": "certified", "completedAt": "2025-03-20T00:00:00Z"}));
            }
            true
        });
        let recomputed = engine.compute(SCOPE);
        assert_eq!(recomputed.total_reports, 4);
        assert_eq!(recomputed.month("2025-03").unwrap().success_rate, "75.0%");
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_and_invalidate_force_recompute() {
        let cache = QueryCache::new(
            SharedStore::new(Arc::new(MemoryStore::new())),
            DemoGate::new(false),
        );
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        // One month of data, so throughput runs once per computation
        let policy = MetricsPolicy::default().throughput(move |reports, machines| {
            counter.fetch_add(1, Ordering::SeqCst);
            reports + machines
        });
        let engine = MetricsEngine::new(cache.clone(), policy);
        load(&cache, Collection::AuditReports, march_reports()).await;
        load(&cache, Collection::Machines, json!([])).await;

        engine.compute(SCOPE);
        engine.compute(SCOPE);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        engine.invalidate(SCOPE);
        engine.compute(SCOPE);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        engine.compute(SCOPE);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_data_is_ready_immediately() {
        let cache = QueryCache::new(
            SharedStore::new(Arc::new(MemoryStore::new())),
            DemoGate::new(true),
        );
        let engine = MetricsEngine::new(cache, MetricsPolicy::default());
        let metrics = engine.compute(SCOPE);
        assert!(metrics.ready);
        assert!(metrics.total_reports > 0);
    }
}
