//! Dashboard metrics derived from cached audit reports and machines.

mod aggregate;
mod engine;
mod policy;

pub use aggregate::{aggregate, classify, format_rate, Outcome};
pub use engine::MetricsEngine;
pub use policy::{DurationPolicy, MetricsPolicy, ThroughputPolicy, DEFAULT_SECONDS_PER_DEVICE};
