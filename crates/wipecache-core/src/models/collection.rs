use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Data is considered stale after 5 minutes for every collection.
const DEFAULT_STALE_MINUTES: u64 = 5;

/// The entity collections the dashboard caches.
///
/// Each collection owns its persistent partition name. Partition names are
/// spelled out only in [`Collection::partition`], so two read paths can never
/// disagree about where a collection is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Machines,
    AuditReports,
    Subusers,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Machines,
        Collection::AuditReports,
        Collection::Subusers,
    ];

    /// Persistent store partition for this collection.
    pub fn partition(&self) -> &'static str {
        match self {
            Collection::Machines => "machines",
            Collection::AuditReports => "audit_reports",
            Collection::Subusers => "subusers",
        }
    }

    /// Path segment of the collection on the remote service.
    pub fn path(&self) -> &'static str {
        match self {
            Collection::Machines => "machines",
            Collection::AuditReports => "reports",
            Collection::Subusers => "subusers",
        }
    }

    /// Wire field holding the natural key of an entity in this collection.
    pub fn key_field(&self) -> &'static str {
        match self {
            Collection::Machines => "hostname",
            Collection::AuditReports => "reportId",
            Collection::Subusers => "email",
        }
    }

    pub fn default_stale_after(&self) -> Duration {
        Duration::from_secs(DEFAULT_STALE_MINUTES * 60)
    }

    /// How long an unused entry stays in memory. Audit reports change the
    /// most, sub-accounts the least.
    pub fn default_retain_for(&self) -> Duration {
        let minutes = match self {
            Collection::AuditReports => 15,
            Collection::Machines => 30,
            Collection::Subusers => 60,
        };
        Duration::from_secs(minutes * 60)
    }

    /// Value served when nothing is cached anywhere and the fetch failed.
    pub fn default_value(&self) -> Value {
        Value::Array(Vec::new())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.partition())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_partitions_are_unique() {
        let partitions: HashSet<_> = Collection::ALL.iter().map(|c| c.partition()).collect();
        assert_eq!(partitions.len(), Collection::ALL.len());
    }

    #[test]
    fn test_retention_follows_volatility() {
        assert!(
            Collection::AuditReports.default_retain_for()
                < Collection::Machines.default_retain_for()
        );
        assert!(
            Collection::Machines.default_retain_for() < Collection::Subusers.default_retain_for()
        );
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&Collection::AuditReports).unwrap(),
            "\"audit_reports\""
        );
        let parsed: Collection = serde_json::from_str("\"subusers\"").unwrap();
        assert_eq!(parsed, Collection::Subusers);
    }
}
