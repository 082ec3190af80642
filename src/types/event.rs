//! Event records
//!
//! An event record is produced once by stamping a `track` call and is never
//! modified afterwards; the stores only decide whether it is still queued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::Properties;

/// Property keys the stamping step owns. Caller-supplied values for these
/// keys are always overwritten.
pub mod system_keys {
    pub const DISTINCT_ID: &str = "distinct_id";
    pub const TOKEN: &str = "token";
    pub const TIME: &str = "time";
    pub const LIB: &str = "mp_lib";
    pub const LIB_VERSION: &str = "$lib_version";
    pub const NAME_TAG: &str = "mp_name_tag";
    pub const DURATION: &str = "$duration";
}

/// A tracked event with fully merged properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event name as passed to `track`
    pub name: String,

    /// Super properties, call properties, `$duration` and system
    /// properties, merged in that precedence order
    pub properties: Properties,

    /// When the event was tracked
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// Distinct id at the moment of tracking
    #[serde(rename = "distinctId")]
    pub distinct_id: String,
}

impl EventRecord {
    pub fn new(
        name: impl Into<String>,
        properties: Properties,
        timestamp: DateTime<Utc>,
        distinct_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            properties,
            timestamp,
            distinct_id: distinct_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyValue;
    use chrono::TimeZone;

    #[test]
    fn test_event_record_serialization() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = EventRecord::new(
            "Signed Up",
            Properties::new().with("plan", "pro"),
            at,
            "user-1",
        );

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"name\":\"Signed Up\""));
        assert!(json.contains("\"distinctId\":\"user-1\""));

        let parsed: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(
            parsed.properties.get("plan"),
            Some(&PropertyValue::String("pro".to_string()))
        );
    }
}
