use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::models::AuditReport;

/// Seconds of erasure time assumed per device.
pub const DEFAULT_SECONDS_PER_DEVICE: f64 = 300.0;

/// Estimated duration of one report, in seconds.
pub type DurationPolicy = Arc<dyn Fn(&AuditReport) -> f64 + Send + Sync>;

/// Throughput of a month from its report count and distinct active machines.
pub type ThroughputPolicy = Arc<dyn Fn(u64, u64) -> u64 + Send + Sync>;

/// Formulas and freshness window used by the metrics engine.
///
/// The duration and throughput formulas are placeholders (the service reports
/// neither), so both are plain functions that callers can replace.
#[derive(Clone)]
pub struct MetricsPolicy {
    pub estimate_duration: DurationPolicy,
    pub throughput: ThroughputPolicy,
    /// How long a computed result is reused while its sources are unchanged.
    pub stale_after: Duration,
}

impl Default for MetricsPolicy {
    fn default() -> Self {
        Self::with_seconds_per_device(DEFAULT_SECONDS_PER_DEVICE)
    }
}

impl MetricsPolicy {
    pub fn with_seconds_per_device(seconds: f64) -> Self {
        Self {
            estimate_duration: Arc::new(move |report| f64::from(report.device_count) * seconds),
            throughput: Arc::new(|reports, machines| reports + machines),
            stale_after: Duration::from_secs(5 * 60),
        }
    }

    pub fn estimate_duration<F>(mut self, f: F) -> Self
    where
        F: Fn(&AuditReport) -> f64 + Send + Sync + 'static,
    {
        self.estimate_duration = Arc::new(f);
        self
    }

    pub fn throughput<F>(mut self, f: F) -> Self
    where
        F: Fn(u64, u64) -> u64 + Send + Sync + 'static,
    {
        self.throughput = Arc::new(f);
        self
    }

    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

impl fmt::Debug for MetricsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsPolicy")
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}
