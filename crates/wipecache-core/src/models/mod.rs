//! Data models for the erasure dashboard.
//!
//! - `Collection`: the cached entity types and their storage naming
//! - `Machine`, `AuditReport`, `Subuser`: entities with natural keys
//! - `DerivedMetrics`, `MonthlyMetric`: computed dashboard rollups

pub mod collection;
pub mod machine;
pub mod metrics;
pub mod report;
pub mod subuser;

pub use collection::Collection;
pub use machine::{annotate_erasure_counts, Machine};
pub use metrics::{DerivedMetrics, MonthlyMetric};
pub use report::AuditReport;
pub use subuser::Subuser;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

use crate::utils::parse_timestamp;

/// An entity stored in one of the cached collections.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    /// Key that uniquely identifies the entity within its collection.
    fn natural_key(&self) -> &str;
}

/// Deserialize an optional timestamp, dropping values that don't parse
/// instead of failing the whole record.
pub(crate) fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}
