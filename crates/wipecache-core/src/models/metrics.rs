//! Derived dashboard metrics.
//!
//! These values have no identity of their own; they are recomputed from the
//! audit report and machine collections of one scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-month rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct MonthlyMetric {
    /// `YYYY-MM`
    pub month: String,
    /// `Mar 2025`
    pub label: String,
    pub report_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: String,
    pub total_duration_secs: f64,
    pub average_duration_secs: f64,
    pub active_machines: u64,
    pub throughput: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetrics {
    pub scope: String,
    /// False until both source collections have been loaded for the scope.
    pub ready: bool,
    /// Chronological.
    pub months: Vec<MonthlyMetric>,
    pub total_reports: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: String,
    pub average_duration_secs: f64,
    pub computed_at: Option<DateTime<Utc>>,
}

impl DerivedMetrics {
    /// Zeroed metrics reported while source data is missing.
    pub fn empty(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ready: false,
            months: Vec::new(),
            total_reports: 0,
            success_count: 0,
            failure_count: 0,
            success_rate: "0.0%".to_string(),
            average_duration_secs: 0.0,
            computed_at: None,
        }
    }

    pub fn month(&self, month: &str) -> Option<&MonthlyMetric> {
        self.months.iter().find(|m| m.month == month)
    }
}
