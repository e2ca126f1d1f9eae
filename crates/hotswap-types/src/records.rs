//! Records that survive a process restart.
//!
//! Both live in the key-value store: the last applied bundle as a plain
//! string, the pending marker as a small JSON object.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Store key holding the URL of the last successfully applied bundle.
pub const LAST_UPDATED_BUNDLE_KEY: &str = "LAST_UPDATED_BUNDLE";

/// Store key holding the in-flight download marker.
pub const UPDATE_PENDING_KEY: &str = "UPDATE_PENDING";

/// The last bundle that was downloaded and installed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    pub bundle_url: String,
}

impl UpdateRecord {
    pub fn new(bundle_url: impl Into<String>) -> Self {
        Self {
            bundle_url: bundle_url.into(),
        }
    }

    /// Stored value is the bare URL, not JSON.
    pub fn from_store_value(value: String) -> Self {
        Self { bundle_url: value }
    }

    pub fn to_store_value(&self) -> String {
        self.bundle_url.clone()
    }

    /// Whether `remote_url` names a different bundle than this record.
    pub fn differs_from(&self, remote_url: &str) -> bool {
        self.bundle_url != remote_url
    }
}

/// Checkpoint written before a download starts and removed once it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdateRecord {
    pub bundle_url: String,
    /// Creation time in epoch milliseconds. Diagnostics only.
    pub timestamp: i64,
}

impl PendingUpdateRecord {
    /// Create a marker stamped with the current time
    pub fn new(bundle_url: impl Into<String>) -> Self {
        Self {
            bundle_url: bundle_url.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_timestamp(bundle_url: impl Into<String>, timestamp: i64) -> Self {
        Self {
            bundle_url: bundle_url.into(),
            timestamp,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize pending update record")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse pending update record")
    }

    /// A marker with a blank URL cannot be resumed.
    pub fn is_actionable(&self) -> bool {
        !self.bundle_url.trim().is_empty()
    }

    /// Milliseconds elapsed since the marker was written, never negative.
    pub fn age_millis(&self) -> i64 {
        (Utc::now().timestamp_millis() - self.timestamp).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_record_uses_camel_case_keys() {
        let record = PendingUpdateRecord::with_timestamp("https://cdn.example.com/b1.zip", 1700);
        let json = record.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["bundleUrl"], "https://cdn.example.com/b1.zip");
        assert_eq!(value["timestamp"], 1700);
    }

    #[test]
    fn test_pending_record_parses_marker_written_by_older_clients() {
        let raw = r#"{"bundleUrl":"b2","timestamp":1699999999999}"#;
        let record = PendingUpdateRecord::from_json(raw).unwrap();

        assert_eq!(record.bundle_url, "b2");
        assert_eq!(record.timestamp, 1_699_999_999_999);
    }

    #[test]
    fn test_pending_record_rejects_garbage() {
        assert!(PendingUpdateRecord::from_json("not json").is_err());
        assert!(PendingUpdateRecord::from_json(r#"{"timestamp":1}"#).is_err());
    }

    #[test]
    fn test_pending_record_actionable() {
        assert!(PendingUpdateRecord::new("b1").is_actionable());
        assert!(!PendingUpdateRecord::new("").is_actionable());
        assert!(!PendingUpdateRecord::new("   ").is_actionable());
    }

    #[test]
    fn test_pending_record_age_is_never_negative() {
        let future = PendingUpdateRecord::with_timestamp("b1", i64::MAX);
        assert_eq!(future.age_millis(), 0);
    }

    #[test]
    fn test_update_record_store_value_is_plain_string() {
        let record = UpdateRecord::new("b1");
        assert_eq!(record.to_store_value(), "b1");
        assert_eq!(UpdateRecord::from_store_value("b1".to_string()), record);
    }

    #[test]
    fn test_update_record_differs_from() {
        let record = UpdateRecord::new("b1");
        assert!(!record.differs_from("b1"));
        assert!(record.differs_from("b2"));
    }
}
