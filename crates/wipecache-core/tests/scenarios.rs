mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{dashboard, memory_store, settle, FakeRemote, SCOPE};
use wipecache_core::store::{JsonFileStore, SharedStore};
use wipecache_core::{Collection, Dashboard, DemoGate, Machine};

fn m1() -> serde_json::Value {
    json!({"hostname": "ws-01", "os": "Ubuntu 22.04"})
}

fn m2() -> serde_json::Value {
    json!({"hostname": "ws-02", "os": "Windows 11"})
}

fn hostnames(machines: &[Machine]) -> Vec<&str> {
    machines.iter().map(|m| m.hostname.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn cold_read_fetches_and_writes_through() {
    let remote = FakeRemote::new().with_list(Collection::Machines, json!([m1(), m2()]));
    let store = memory_store();
    let dashboard = dashboard(remote.clone(), store.clone());

    let machines = dashboard.machines(SCOPE).await;
    assert_eq!(hostnames(&machines.data), vec!["ws-01", "ws-02"]);
    assert!(!machines.is_loading);
    assert!(!machines.is_error);

    assert_eq!(store.get("machines", SCOPE).await, Some(json!([m1(), m2()])));
    assert_eq!(remote.list_calls(Collection::Machines), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_read_returns_old_data_then_refreshes() {
    let remote = FakeRemote::new().with_list(Collection::Machines, json!([m1()]));
    let dashboard = dashboard(remote.clone(), memory_store());
    dashboard.machines(SCOPE).await;

    remote.set_list(Collection::Machines, json!([m1(), m2()]));
    tokio::time::advance(Duration::from_secs(5 * 60)).await;

    let immediate = dashboard.machines(SCOPE).await;
    assert_eq!(hostnames(&immediate.data), vec!["ws-01"]);
    assert!(immediate.is_loading);

    settle().await;
    let refreshed = dashboard.machines(SCOPE).await;
    assert_eq!(hostnames(&refreshed.data), vec!["ws-01", "ws-02"]);
    assert_eq!(remote.list_calls(Collection::Machines), 2);
}

#[tokio::test(start_paused = true)]
async fn failing_service_is_masked_by_persisted_data() {
    let remote = FakeRemote::new();
    remote.set_failing(true);
    let store = memory_store();
    store.put("machines", SCOPE, json!([m1()])).await;
    let dashboard = dashboard(remote.clone(), store.clone());

    let machines = dashboard.machines(SCOPE).await;
    assert_eq!(hostnames(&machines.data), vec!["ws-01"]);
    assert!(!machines.is_error);

    settle().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let after_failure = dashboard.machines(SCOPE).await;
    assert_eq!(hostnames(&after_failure.data), vec!["ws-01"]);
    assert!(!after_failure.is_error);
    assert!(after_failure
        .error
        .is_some_and(|e| e.contains("service unavailable")));
    // A failed refresh never clobbers the persisted copy
    assert_eq!(store.get("machines", SCOPE).await, Some(json!([m1()])));
}

#[tokio::test(start_paused = true)]
async fn failing_service_with_nothing_cached_is_an_error() {
    let remote = FakeRemote::new();
    remote.set_failing(true);
    let dashboard = dashboard(remote.clone(), memory_store());

    let machines = dashboard.machines(SCOPE).await;
    assert!(machines.data.is_empty());
    assert!(machines.is_error);
    // Initial attempt plus one retry
    assert_eq!(remote.list_calls(Collection::Machines), 2);
}

#[tokio::test(start_paused = true)]
async fn march_metrics_with_one_failure() {
    let remote = FakeRemote::new()
        .with_list(
            Collection::AuditReports,
            json!([
                {"reportId": "r1", "status": "Failed", "completedAt": "2025-03-03T10:00:00Z", "hostname": "ws-01"},
                {"reportId": "r2", "status": "Completed", "completedAt": "2025-03-12T10:00:00Z", "hostname": "ws-01"},
                {"reportId": "r3", "status": "Completed", "timestamp": "2025-03-21T16:30:00Z", "hostname": "ws-02"},
            ]),
        )
        .with_list(Collection::Machines, json!([m1(), m2()]));
    let dashboard = dashboard(remote.clone(), memory_store());

    let metrics = dashboard.metrics(SCOPE).await;
    assert!(metrics.ready);
    let march = metrics.month("2025-03").expect("march bucket");
    assert_eq!(march.report_count, 3);
    assert_eq!(march.success_count, 2);
    assert_eq!(march.failure_count, 1);
    assert_eq!(march.success_rate, "66.7%");

    // Computing again is served from the memo and the cache
    let calls = remote.calls();
    assert_eq!(dashboard.metrics(SCOPE).await, metrics);
    assert_eq!(remote.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn enhanced_machines_count_reports() {
    let remote = FakeRemote::new()
        .with_list(Collection::Machines, json!([m1(), m2()]))
        .with_list(
            Collection::AuditReports,
            json!([
                {"reportId": "r1", "status": "Completed", "machineHostname": "WS-01"},
                {"reportId": "r2", "status": "Completed", "machineHostname": "ws-01"},
            ]),
        );
    let dashboard = dashboard(remote.clone(), memory_store());

    let machines = dashboard.machines_enhanced(SCOPE).await;
    let counts: Vec<_> = machines.data.iter().map(|m| m.erasure_count).collect();
    assert_eq!(counts, vec![Some(2), Some(0)]);

    // Composed from the base collections: no extra network shape
    assert_eq!(remote.calls(), 2);
    assert!(dashboard.cache().store().get("machines", SCOPE).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn enhanced_view_follows_new_reports() {
    let remote = FakeRemote::new()
        .with_list(Collection::Machines, json!([m1()]))
        .with_list(
            Collection::AuditReports,
            json!([{"reportId": "r1", "status": "Completed", "machineHostname": "ws-01"}]),
        );
    let dashboard = dashboard(remote.clone(), memory_store());
    assert_eq!(
        dashboard.machines_enhanced(SCOPE).await.data[0].erasure_count,
        Some(1)
    );

    remote.set_list(
        Collection::AuditReports,
        json!([
            {"reportId": "r1", "status": "Completed", "machineHostname": "ws-01"},
            {"reportId": "r2", "status": "Failed", "machineHostname": "ws-01"},
        ]),
    );
    let reports = dashboard.audit_reports(SCOPE).await.refetch().await;
    assert_eq!(reports.data.len(), 2);

    let machines = dashboard.machines_enhanced(SCOPE).await;
    let machines = if machines.is_loading {
        machines.refetch().await
    } else {
        machines
    };
    assert_eq!(machines.data[0].erasure_count, Some(2));
}

#[tokio::test(start_paused = true)]
async fn legacy_field_names_are_normalized_before_persisting() {
    let remote = FakeRemote::new().with_list(
        Collection::AuditReports,
        json!([{"id": "r1", "status": "Completed", "timestamp": "2025-01-20T08:15:00Z", "hostname": "ws-01"}]),
    );
    let store = memory_store();
    let dashboard = dashboard(remote.clone(), store.clone());

    dashboard.audit_reports(SCOPE).await;
    assert_eq!(
        store.get("audit_reports", SCOPE).await,
        Some(json!([{
            "reportId": "r1",
            "status": "Completed",
            "deviceCount": 1,
            "completedAt": "2025-01-20T08:15:00Z",
            "machineHostname": "ws-01"
        }]))
    );
}

#[tokio::test(start_paused = true)]
async fn undecodable_payload_keeps_last_known_data() {
    let remote = FakeRemote::new().with_list(Collection::Machines, json!([{"os": "no hostname"}]));
    let store = memory_store();
    store.put("machines", SCOPE, json!([m1()])).await;
    let dashboard = dashboard(remote.clone(), store.clone());

    dashboard.machines(SCOPE).await;
    settle().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let machines = dashboard.machines(SCOPE).await;
    assert_eq!(hostnames(&machines.data), vec!["ws-01"]);
    assert!(machines.error.is_some_and(|e| e.contains("machines")));
    assert_eq!(store.get("machines", SCOPE).await, Some(json!([m1()])));
}

#[tokio::test]
async fn file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let online = FakeRemote::new().with_list(Collection::Machines, json!([m1(), m2()]));
    let first = Dashboard::builder(online)
        .store_dir(dir.path())
        .demo(DemoGate::new(false))
        .build();
    first.machines(SCOPE).await;

    let offline = FakeRemote::new();
    offline.set_failing(true);
    let second = Dashboard::builder(offline)
        .store(SharedStore::new(Arc::new(JsonFileStore::new(dir.path()))))
        .demo(DemoGate::new(false))
        .build();
    let machines = second.machines(SCOPE).await;
    assert_eq!(hostnames(&machines.data), vec!["ws-01", "ws-02"]);
    assert!(!machines.is_error);
    assert!(second
        .stored_age(Collection::Machines, SCOPE)
        .await
        .is_some());
}
