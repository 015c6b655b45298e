use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Collection, Entity};
use crate::utils::parse_timestamp;

/// An erasure audit report.
///
/// The service has emitted the completion time under three different field
/// names over its lifetime and omits `deviceCount` on single-drive jobs.
/// Deserialization goes through [`AuditReportWire`] which resolves all of that
/// once; the rest of the crate only ever sees the canonical shape below,
/// which is also what gets persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(from = "AuditReportWire")]
pub struct AuditReport {
    #[serde(rename = "reportId")]
    pub report_id: String,
    pub status: String,
    #[serde(rename = "deviceCount")]
    pub device_count: u32,
    #[serde(rename = "completedAt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "machineHostname", skip_serializing_if = "Option::is_none")]
    pub machine_hostname: Option<String>,
    #[serde(rename = "erasureMethod", skip_serializing_if = "Option::is_none")]
    pub erasure_method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuditReportWire {
    #[serde(rename = "reportId", alias = "id")]
    report_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(rename = "deviceCount", alias = "devices", default)]
    device_count: Option<u32>,
    #[serde(rename = "completedAt", default)]
    completed_at: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(rename = "createdAt", default)]
    created_at: Option<String>,
    #[serde(rename = "machineHostname", alias = "hostname", default)]
    machine_hostname: Option<String>,
    #[serde(rename = "erasureMethod", alias = "method", default)]
    erasure_method: Option<String>,
}

impl From<AuditReportWire> for AuditReport {
    fn from(wire: AuditReportWire) -> Self {
        // First field that is populated and parses wins
        let completed_at = [wire.completed_at, wire.timestamp, wire.created_at]
            .into_iter()
            .flatten()
            .find_map(|raw| parse_timestamp(&raw));

        Self {
            report_id: wire.report_id,
            status: wire.status.unwrap_or_default(),
            device_count: wire.device_count.unwrap_or(1),
            completed_at,
            machine_hostname: wire.machine_hostname,
            erasure_method: wire.erasure_method,
        }
    }
}

impl Entity for AuditReport {
    const COLLECTION: Collection = Collection::AuditReports;

    fn natural_key(&self) -> &str {
        &self.report_id
    }
}
