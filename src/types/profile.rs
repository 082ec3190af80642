//! Profile mutation records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::PropertyValue;

/// Kind of change applied to a user profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileOperation {
    /// Overwrite properties
    Set,
    /// Set properties only where no value exists yet
    SetOnce,
    /// Add to numeric properties
    Increment,
    /// Append values to list properties
    Append,
    /// Union lists into list properties
    Union,
    /// Record a charge in the transaction history
    TrackCharge,
    /// Delete the profile
    Delete,
    /// Map an alias onto a canonical distinct id
    CreateAlias,
}

impl ProfileOperation {
    /// Operation key used in the wire object
    pub fn wire_key(&self) -> &'static str {
        match self {
            ProfileOperation::Set => "$set",
            ProfileOperation::SetOnce => "$set_once",
            ProfileOperation::Increment => "$add",
            ProfileOperation::Append | ProfileOperation::TrackCharge => "$append",
            ProfileOperation::Union => "$union",
            ProfileOperation::Delete => "$delete",
            ProfileOperation::CreateAlias => "$create_alias",
        }
    }
}

impl std::fmt::Display for ProfileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProfileOperation::Set => "set",
            ProfileOperation::SetOnce => "set_once",
            ProfileOperation::Increment => "increment",
            ProfileOperation::Append => "append",
            ProfileOperation::Union => "union",
            ProfileOperation::TrackCharge => "track_charge",
            ProfileOperation::Delete => "delete",
            ProfileOperation::CreateAlias => "create_alias",
        };
        f.write_str(name)
    }
}

/// A queued profile mutation bound to a distinct id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMutation {
    pub operation: ProfileOperation,

    #[serde(rename = "distinctId")]
    pub distinct_id: String,

    /// A `Map` for most operations; any value for the rest
    pub payload: PropertyValue,

    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

/// A profile mutation issued before any profile identity was set
///
/// Held in the identity state until `identify` supplies the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub operation: ProfileOperation,
    pub payload: PropertyValue,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

impl PendingMutation {
    pub fn new(operation: ProfileOperation, payload: PropertyValue, timestamp: DateTime<Utc>) -> Self {
        Self {
            operation,
            payload,
            timestamp,
        }
    }

    /// Bind to a distinct id, keeping the original timestamp
    pub fn into_mutation(self, distinct_id: impl Into<String>) -> ProfileMutation {
        ProfileMutation {
            operation: self.operation,
            distinct_id: distinct_id.into(),
            payload: self.payload,
            timestamp: self.timestamp,
        }
    }
}
