use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::format_age;

/// One persisted collection value for a `(partition, scope)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentRecord {
    pub partition: String,
    pub scope: String,
    pub value: Value,
    pub written_at: DateTime<Utc>,
}

impl PersistentRecord {
    pub fn new(partition: impl Into<String>, scope: impl Into<String>, value: Value) -> Self {
        Self {
            partition: partition.into(),
            scope: scope.into(),
            value,
            written_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.written_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        format_age(self.age_minutes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_record_age_display() {
        let fresh = PersistentRecord::new("machines", "a@x.com", json!([]));
        assert_eq!(fresh.age_display(), "just now");

        let mut old = fresh.clone();
        old.written_at = Utc::now() - Duration::minutes(61);
        assert_eq!(old.age_minutes(), 61);
        assert_eq!(old.age_display(), "1h ago");
    }
}
