use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{lenient_timestamp, AuditReport, Collection, Entity};

/// A machine registered to an account, identified by hostname.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Machine {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(rename = "serialNumber", alias = "serial", default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(
        rename = "activatedAt",
        alias = "activationDate",
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Only populated on the "enhanced" view.
    #[serde(rename = "erasureCount", default, skip_serializing_if = "Option::is_none")]
    pub erasure_count: Option<u32>,
}

impl Entity for Machine {
    const COLLECTION: Collection = Collection::Machines;

    fn natural_key(&self) -> &str {
        &self.hostname
    }
}

impl Machine {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            os: None,
            serial_number: None,
            activated_at: None,
            status: None,
            erasure_count: None,
        }
    }

    pub fn display_os(&self) -> &str {
        self.os.as_deref().unwrap_or("-")
    }
}

/// Annotate each machine with the number of audit reports naming it.
///
/// Hostnames are compared case-insensitively; reports without a hostname are
/// not attributed to any machine.
pub fn annotate_erasure_counts(machines: &mut [Machine], reports: &[AuditReport]) {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for hostname in reports.iter().filter_map(|r| r.machine_hostname.as_deref()) {
        *counts.entry(hostname.to_lowercase()).or_default() += 1;
    }
    for machine in machines {
        machine.erasure_count = Some(
            counts
                .get(&machine.hostname.to_lowercase())
                .copied()
                .unwrap_or(0),
        );
    }
}
