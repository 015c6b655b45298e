//! Utility functions for formatting and timestamp parsing.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{format_age, format_duration_secs, parse_timestamp, truncate_string};
