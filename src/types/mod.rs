//! Data types for the telemetry queue
//!
//! Property values, event records and profile mutation records.

mod event;
mod profile;
mod value;

pub use event::{system_keys, EventRecord};
pub use profile::{PendingMutation, ProfileMutation, ProfileOperation};
pub use value::{Properties, PropertyValue};
