//! Profile (people) updates

use tracing::warn;

use crate::identity::ProfileDispatch;
use crate::types::{ProfileOperation, Properties, PropertyValue};
use crate::utils::time;

use super::Client;

/// Profile API of a [`Client`], obtained through [`Client::people`]
///
/// Every call is fire-and-forget. Until a profile identity is set (by
/// [`Client::identify`] or [`People::identify`]) mutations are held back and
/// released in order once it is.
pub struct People<'a> {
    client: &'a Client,
}

impl<'a> People<'a> {
    pub(super) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Set the profile identity without changing the event distinct id
    pub fn identify(&self, id: &str) {
        self.client.identify_people(id);
    }

    pub fn set(&self, properties: Properties) -> Option<ProfileDispatch> {
        self.enqueue_map(ProfileOperation::Set, properties)
    }

    pub fn set_one(
        &self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<ProfileDispatch> {
        self.set(Properties::new().with(key, value))
    }

    pub fn set_once(&self, properties: Properties) -> Option<ProfileDispatch> {
        self.enqueue_map(ProfileOperation::SetOnce, properties)
    }

    /// Add to numeric properties; non-numeric values are dropped
    pub fn increment(&self, mut properties: Properties) -> Option<ProfileDispatch> {
        properties.retain(|key, value| {
            let keep = value.is_numeric();
            if !keep {
                warn!(key, kind = value.kind(), "Dropping non-numeric increment");
            }
            keep
        });
        self.enqueue_map(ProfileOperation::Increment, properties)
    }

    pub fn increment_by(
        &self,
        key: impl Into<String>,
        amount: impl Into<PropertyValue>,
    ) -> Option<ProfileDispatch> {
        self.increment(Properties::new().with(key, amount))
    }

    pub fn append(&self, properties: Properties) -> Option<ProfileDispatch> {
        self.enqueue_map(ProfileOperation::Append, properties)
    }

    /// Union lists into list properties; non-list values are dropped
    pub fn union(&self, mut properties: Properties) -> Option<ProfileDispatch> {
        properties.retain(|key, value| {
            let keep = matches!(value, PropertyValue::List(_));
            if !keep {
                warn!(key, kind = value.kind(), "Dropping non-list union value");
            }
            keep
        });
        self.enqueue_map(ProfileOperation::Union, properties)
    }

    /// Record a charge; `$amount` and `$time` override same-named properties
    pub fn track_charge(&self, amount: f64, properties: Properties) -> Option<ProfileDispatch> {
        let amount = match PropertyValue::float(amount) {
            Ok(amount) => amount,
            Err(e) => {
                warn!(error = %e, "Ignoring charge");
                return None;
            }
        };

        let mut charge = properties;
        for (key, reason) in charge.remove_invalid() {
            warn!(key = %key, reason = %reason, "Dropping invalid charge property");
        }
        charge.insert("$amount", amount);
        charge.insert("$time", time::now());
        Some(
            self.client
                .enqueue_profile(ProfileOperation::TrackCharge, charge.into()),
        )
    }

    /// Empty the transaction history
    pub fn clear_charges(&self) -> Option<ProfileDispatch> {
        self.set(Properties::new().with("$transactions", PropertyValue::List(Vec::new())))
    }

    /// Delete the whole profile
    pub fn delete_user(&self) -> ProfileDispatch {
        self.client
            .enqueue_profile(ProfileOperation::Delete, PropertyValue::from(""))
    }

    /// Register a push device token (hex-encoded) on the profile
    pub fn add_push_device_token(&self, token: &[u8]) -> Option<ProfileDispatch> {
        if token.is_empty() {
            warn!("Ignoring empty push device token");
            return None;
        }
        let hex: String = token.iter().map(|b| format!("{:02x}", b)).collect();
        self.union(Properties::new().with(
            "$ios_devices",
            PropertyValue::List(vec![PropertyValue::String(hex)]),
        ))
    }

    fn enqueue_map(
        &self,
        operation: ProfileOperation,
        mut properties: Properties,
    ) -> Option<ProfileDispatch> {
        for (key, reason) in properties.remove_invalid() {
            warn!(%operation, key = %key, reason = %reason, "Dropping invalid profile value");
        }
        if properties.is_empty() {
            warn!(%operation, "Ignoring profile update with no properties");
            return None;
        }
        Some(self.client.enqueue_profile(operation, properties.into()))
    }
}
