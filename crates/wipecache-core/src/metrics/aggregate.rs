use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use super::MetricsPolicy;
use crate::models::{AuditReport, DerivedMetrics, Machine, MonthlyMetric};

const SUCCESS_STATUSES: &[&str] = &["success", "successful", "certified", "completed"];
const FAILURE_STATUSES: &[&str] = &["failed", "failed verification"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Pending, cancelled, or anything unrecognised. Counts toward totals only.
    Other,
}

/// Case-insensitive exact match against the known status vocabulary.
pub fn classify(status: &str) -> Outcome {
    let status = status.trim().to_lowercase();
    if SUCCESS_STATUSES.contains(&status.as_str()) {
        Outcome::Success
    } else if FAILURE_STATUSES.contains(&status.as_str()) {
        Outcome::Failure
    } else {
        Outcome::Other
    }
}

/// `66.7%`; `0.0%` when there is nothing to divide by.
pub fn format_rate(successes: u64, total: u64) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", successes as f64 * 100.0 / total as f64)
}

#[derive(Default)]
struct MonthBucket {
    label: String,
    reports: u64,
    successes: u64,
    failures: u64,
    duration_secs: f64,
    machines: HashSet<String>,
}

impl MonthBucket {
    fn record(&mut self, outcome: Outcome, duration_secs: f64) {
        self.reports += 1;
        self.duration_secs += duration_secs;
        match outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Failure => self.failures += 1,
            Outcome::Other => {}
        }
    }
}

fn bucket<'a>(months: &'a mut BTreeMap<String, MonthBucket>, at: &DateTime<Utc>) -> &'a mut MonthBucket {
    months
        .entry(at.format("%Y-%m").to_string())
        .or_insert_with(|| MonthBucket {
            label: at.format("%b %Y").to_string(),
            ..MonthBucket::default()
        })
}

fn average(total: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Roll reports and machines of one scope up into monthly metrics.
///
/// Months are calendar months in UTC, ordered chronologically. Reports
/// without a timestamp count toward the totals but no month; machines count
/// toward the month they were activated in.
pub fn aggregate(
    scope: &str,
    reports: &[AuditReport],
    machines: &[Machine],
    policy: &MetricsPolicy,
    computed_at: DateTime<Utc>,
) -> DerivedMetrics {
    let mut months: BTreeMap<String, MonthBucket> = BTreeMap::new();
    let mut successes = 0;
    let mut failures = 0;
    let mut total_duration = 0.0;

    for report in reports {
        let outcome = classify(&report.status);
        let duration = (policy.estimate_duration)(report);
        total_duration += duration;
        match outcome {
            Outcome::Success => successes += 1,
            Outcome::Failure => failures += 1,
            Outcome::Other => {}
        }
        if let Some(ref at) = report.completed_at {
            bucket(&mut months, at).record(outcome, duration);
        }
    }

    for machine in machines {
        if let Some(ref at) = machine.activated_at {
            bucket(&mut months, at)
                .machines
                .insert(machine.hostname.to_lowercase());
        }
    }

    let months = months
        .into_iter()
        .map(|(month, b)| {
            let active_machines = b.machines.len() as u64;
            MonthlyMetric {
                month,
                label: b.label,
                report_count: b.reports,
                success_count: b.successes,
                failure_count: b.failures,
                success_rate: format_rate(b.successes, b.reports),
                total_duration_secs: b.duration_secs,
                average_duration_secs: average(b.duration_secs, b.reports),
                active_machines,
                throughput: (policy.throughput)(b.reports, active_machines),
            }
        })
        .collect();

    let total_reports = reports.len() as u64;
    DerivedMetrics {
        scope: scope.to_string(),
        ready: true,
        months,
        total_reports,
        success_count: successes,
        failure_count: failures,
        success_rate: format_rate(successes, total_reports),
        average_duration_secs: average(total_duration, total_reports),
        computed_at: Some(computed_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(id: &str, status: &str, at: Option<&str>, devices: u32) -> AuditReport {
        AuditReport {
            report_id: id.to_string(),
            status: status.to_string(),
            device_count: devices,
            completed_at: at.and_then(crate::utils::parse_timestamp),
            machine_hostname: None,
            erasure_method: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_classify_vocabulary() {
        assert_eq!(classify("Completed"), Outcome::Success);
        assert_eq!(classify("CERTIFIED"), Outcome::Success);
        assert_eq!(classify("success"), Outcome::Success);
        assert_eq!(classify("Failed Verification"), Outcome::Failure);
        assert_eq!(classify("failed"), Outcome::Failure);
        assert_eq!(classify("completed with warnings"), Outcome::Other);
        assert_eq!(classify(""), Outcome::Other);
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(2, 3), "66.7%");
        assert_eq!(format_rate(1, 3), "33.3%");
        assert_eq!(format_rate(3, 3), "100.0%");
        assert_eq!(format_rate(0, 0), "0.0%");
    }

    #[test]
    fn test_march_with_one_failure() {
        let reports = vec![
            report("r1", "Failed", Some("2025-03-03T10:00:00Z"), 1),
            report("r2", "Completed", Some("2025-03-10T10:00:00Z"), 2),
            report("r3", "Completed", Some("2025-03-28T23:59:59Z"), 1),
        ];
        let metrics = aggregate("a@x.com", &reports, &[], &MetricsPolicy::default(), now());

        let march = metrics.month("2025-03").unwrap();
        assert_eq!(march.label, "Mar 2025");
        assert_eq!(march.report_count, 3);
        assert_eq!(march.success_count, 2);
        assert_eq!(march.failure_count, 1);
        assert_eq!(march.success_rate, "66.7%");
        assert_eq!(march.total_duration_secs, 1200.0);
        assert_eq!(march.average_duration_secs, 400.0);
        assert_eq!(metrics.success_rate, "66.7%");
    }

    #[test]
    fn test_months_are_chronological_and_include_machines() {
        let reports = vec![
            report("r1", "Completed", Some("2025-02-01T00:00:00Z"), 1),
            report("r2", "Completed", Some("2024-12-15T00:00:00Z"), 1),
            report("r3", "Pending", None, 1),
        ];
        let mut ws1 = Machine::new("WS-01");
        ws1.activated_at = crate::utils::parse_timestamp("2025-01-05T00:00:00Z");
        let mut ws1_again = Machine::new("ws-01");
        ws1_again.activated_at = crate::utils::parse_timestamp("2025-01-20T00:00:00Z");
        let mut ws2 = Machine::new("ws-02");
        ws2.activated_at = crate::utils::parse_timestamp("2025-02-02T00:00:00Z");

        let metrics = aggregate(
            "a@x.com",
            &reports,
            &[ws1, ws1_again, ws2, Machine::new("never-activated")],
            &MetricsPolicy::default(),
            now(),
        );

        let order: Vec<&str> = metrics.months.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(order, vec!["2024-12", "2025-01", "2025-02"]);

        let january = metrics.month("2025-01").unwrap();
        assert_eq!(january.report_count, 0);
        assert_eq!(january.active_machines, 1);
        assert_eq!(january.success_rate, "0.0%");

        let february = metrics.month("2025-02").unwrap();
        assert_eq!(february.throughput, 2);

        // Untimestamped report is in the totals only
        assert_eq!(metrics.total_reports, 3);
        assert_eq!(metrics.success_rate, "66.7%");
    }

    #[test]
    fn test_custom_policy() {
        let policy = MetricsPolicy::with_seconds_per_device(60.0).throughput(|reports, _| reports * 10);
        let reports = vec![report("r1", "completed", Some("2025-03-01T00:00:00Z"), 4)];
        let metrics = aggregate("a@x.com", &reports, &[], &policy, now());

        let march = metrics.month("2025-03").unwrap();
        assert_eq!(march.total_duration_secs, 240.0);
        assert_eq!(march.throughput, 10);
    }
}
