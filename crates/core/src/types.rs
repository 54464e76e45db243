/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Ordered parameter map, as sent upstream and stored in history snapshots.
pub type ParamMap = serde_json::Map<String, serde_json::Value>;
