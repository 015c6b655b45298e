//! Demo substitution.
//!
//! While the gate is active every read is answered from a fixed synthetic
//! dataset: the persistent store and the remote service are never touched and
//! nothing is cached. The dashboard uses this for sales demos and screenshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde_json::{json, Value};
use tracing::info;

use crate::cache::CacheKey;
use crate::models::{annotate_erasure_counts, AuditReport, Collection, Machine};

/// Variant name of the machines view annotated with erasure counts.
pub const ENHANCED_VARIANT: &str = "enhanced";

/// Toggle for demo substitution. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct DemoGate {
    active: Arc<AtomicBool>,
}

impl DemoGate {
    pub fn new(active: bool) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(active)),
        }
    }

    /// The process-wide gate.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<DemoGate> = OnceLock::new();
        GLOBAL.get_or_init(DemoGate::default).clone()
    }

    pub fn is_demo_mode(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set(&self, active: bool) {
        let previous = self.active.swap(active, Ordering::AcqRel);
        if previous != active {
            info!(active, "Demo mode toggled");
        }
    }

    pub fn enable(&self) {
        self.set(true);
    }

    pub fn disable(&self) {
        self.set(false);
    }
}

/// The fixed synthetic dataset served in demo mode. Identical for every scope.
#[derive(Debug, Clone, Default)]
pub struct DemoDataset;

impl DemoDataset {
    pub fn collection(&self, collection: Collection) -> Value {
        match collection {
            Collection::Machines => demo_machines(),
            Collection::AuditReports => demo_reports(),
            Collection::Subusers => demo_subusers(),
        }
    }

    /// Demo value for a cache key, including derived variants.
    pub fn for_key(&self, key: &CacheKey) -> Value {
        match (key.collection, key.variant.as_deref()) {
            (Collection::Machines, Some(ENHANCED_VARIANT)) => {
                let mut machines: Vec<Machine> =
                    serde_json::from_value(demo_machines()).unwrap_or_default();
                let reports: Vec<AuditReport> =
                    serde_json::from_value(demo_reports()).unwrap_or_default();
                annotate_erasure_counts(&mut machines, &reports);
                serde_json::to_value(machines).unwrap_or_else(|_| demo_machines())
            }
            (collection, _) => self.collection(collection),
        }
    }
}

fn demo_machines() -> Value {
    json!([
        {"hostname": "demo-ws-01", "os": "Windows 11", "serialNumber": "DMO-1001", "activatedAt": "2025-01-06T09:00:00Z", "status": "active"},
        {"hostname": "demo-ws-02", "os": "Windows 10", "serialNumber": "DMO-1002", "activatedAt": "2025-01-21T14:30:00Z", "status": "active"},
        {"hostname": "demo-mac-01", "os": "macOS 14", "serialNumber": "DMO-2001", "activatedAt": "2025-02-03T11:15:00Z", "status": "active"},
        {"hostname": "demo-srv-01", "os": "Ubuntu 22.04", "serialNumber": "DMO-3001", "activatedAt": "2025-03-10T08:45:00Z", "status": "active"},
        {"hostname": "demo-srv-02", "os": "Ubuntu 22.04", "serialNumber": "DMO-3002", "activatedAt": "2025-03-17T16:20:00Z", "status": "inactive"}
    ])
}

fn demo_reports() -> Value {
    json!([
        {"reportId": "DEMO-0001", "status": "Completed", "deviceCount": 2, "completedAt": "2025-01-08T10:12:00Z", "machineHostname": "demo-ws-01", "erasureMethod": "NIST 800-88 Purge"},
        {"reportId": "DEMO-0002", "status": "Certified", "deviceCount": 1, "completedAt": "2025-01-23T15:40:00Z", "machineHostname": "demo-ws-02", "erasureMethod": "NIST 800-88 Clear"},
        {"reportId": "DEMO-0003", "status": "Failed", "deviceCount": 1, "completedAt": "2025-01-29T09:05:00Z", "machineHostname": "demo-ws-02", "erasureMethod": "DoD 5220.22-M"},
        {"reportId": "DEMO-0004", "status": "Completed", "deviceCount": 4, "completedAt": "2025-02-05T13:22:00Z", "machineHostname": "demo-mac-01", "erasureMethod": "NIST 800-88 Purge"},
        {"reportId": "DEMO-0005", "status": "Success", "deviceCount": 3, "completedAt": "2025-02-18T17:03:00Z", "machineHostname": "demo-ws-01", "erasureMethod": "NIST 800-88 Purge"},
        {"reportId": "DEMO-0006", "status": "Completed", "deviceCount": 8, "completedAt": "2025-03-11T08:55:00Z", "machineHostname": "demo-srv-01", "erasureMethod": "Crypto Erase"},
        {"reportId": "DEMO-0007", "status": "Failed Verification", "deviceCount": 2, "completedAt": "2025-03-14T12:30:00Z", "machineHostname": "demo-srv-01", "erasureMethod": "NIST 800-88 Purge"},
        {"reportId": "DEMO-0008", "status": "Certified", "deviceCount": 6, "completedAt": "2025-03-19T10:10:00Z", "machineHostname": "demo-srv-02", "erasureMethod": "Crypto Erase"},
        {"reportId": "DEMO-0009", "status": "Completed", "deviceCount": 1, "completedAt": "2025-03-27T19:48:00Z", "machineHostname": "demo-mac-01", "erasureMethod": "NIST 800-88 Clear"}
    ])
}

fn demo_subusers() -> Value {
    json!([
        {"email": "alex.demo@example.com", "name": "Alex Demo", "role": "admin", "status": "active", "createdAt": "2025-01-02T09:00:00Z"},
        {"email": "sam.demo@example.com", "name": "Sam Demo", "role": "technician", "status": "active", "createdAt": "2025-01-15T09:00:00Z"},
        {"email": "jo.demo@example.com", "name": "Jo Demo", "role": "auditor", "status": "invited", "createdAt": "2025-03-01T09:00:00Z"}
    ])
}
