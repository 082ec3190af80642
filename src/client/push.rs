//! Push notification payloads

use serde_json::Value;

use crate::types::{Properties, PropertyValue};

/// Event tracked when a push carrying campaign info arrives
pub const CAMPAIGN_RECEIVED: &str = "$campaign_received";

/// Campaign properties carried by a push payload
///
/// Looks for `{"mp": {"m": <message id>, "c": <campaign id>, "v": <variant>}}`
/// where `v` is optional. Returns `None` when `mp`, `m` or `c` is missing or
/// not an integer / non-empty string.
pub fn campaign_properties(payload: &Value) -> Option<Properties> {
    let mp = payload.get("mp")?.as_object()?;
    let message_id = id_value(mp.get("m")?)?;
    let campaign_id = id_value(mp.get("c")?)?;

    let mut properties = Properties::new()
        .with("campaign_id", campaign_id)
        .with("message_id", message_id)
        .with("message_type", "push");

    if let Some(variant) = mp.get("v").and_then(id_value) {
        properties.insert("variant_id", variant);
    }
    Some(properties)
}

fn id_value(value: &Value) -> Option<PropertyValue> {
    match value {
        Value::Number(n) => n.as_i64().map(PropertyValue::Int),
        Value::String(s) if !s.is_empty() => Some(PropertyValue::String(s.clone())),
        _ => None,
    }
}
