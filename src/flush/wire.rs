//! Wire format of a batch
//!
//! A batch is a JSON array of objects, base64-encoded and sent as the
//! urlencoded form field `data`:
//!
//! ```text
//! data=<urlencode(base64([{"$kind":"event","event":...,"properties":{...}}, ...]))>
//! ```
//!
//! Profile objects carry `$token`, `$distinct_id`, `$time` (ms) and one
//! operation key (`$set`, `$add`, ...).

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{TelemetryError, TelemetryResult};
use crate::store::QueuedRecord;
use crate::types::{EventRecord, ProfileMutation, ProfileOperation};
use crate::utils::time::unix_millis;

/// A record that can be written into a batch
pub trait WireRecord {
    fn to_wire(&self, token: &str) -> TelemetryResult<Value>;
}

impl WireRecord for EventRecord {
    fn to_wire(&self, _token: &str) -> TelemetryResult<Value> {
        Ok(json!({
            "$kind": "event",
            "event": self.name,
            "properties": Value::Object(self.properties.to_wire()?),
        }))
    }
}

impl WireRecord for ProfileMutation {
    fn to_wire(&self, token: &str) -> TelemetryResult<Value> {
        let payload = self.payload.to_wire()?;
        let payload = match self.operation {
            ProfileOperation::TrackCharge => json!({ "$transactions": payload }),
            _ => payload,
        };

        let mut object = Map::new();
        object.insert("$kind".to_string(), json!("profile"));
        object.insert("$token".to_string(), json!(token));
        object.insert("$distinct_id".to_string(), json!(self.distinct_id));
        object.insert("$time".to_string(), json!(unix_millis(&self.timestamp)));
        object.insert(self.operation.wire_key().to_string(), payload);
        Ok(Value::Object(object))
    }
}

/// A batch ready to POST
#[derive(Debug, Clone, Default)]
pub struct EncodedBatch {
    /// Form body; empty when every record was dropped
    pub body: String,
    /// Ids of the records carried by `body`
    pub ids: Vec<u64>,
    /// Ids of records that could not be serialized
    pub dropped: Vec<u64>,
}

impl EncodedBatch {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Encode a batch, setting aside records that fail to serialize
pub fn encode_batch<R: WireRecord>(
    batch: &[QueuedRecord<R>],
    token: &str,
) -> TelemetryResult<EncodedBatch> {
    let mut encoded = EncodedBatch::default();
    let mut items = Vec::with_capacity(batch.len());

    for queued in batch {
        match queued.record.to_wire(token) {
            Ok(value) => {
                items.push(value);
                encoded.ids.push(queued.id);
            }
            Err(e) => {
                warn!(record_id = queued.id, error = %e, "Dropping record that cannot be serialized");
                encoded.dropped.push(queued.id);
            }
        }
    }

    if !items.is_empty() {
        let json = serde_json::to_vec(&Value::Array(items))
            .map_err(|e| TelemetryError::Serialization(e.to_string()))?;
        encoded.body = format!("data={}", urlencoding::encode(&STANDARD.encode(json)));
    }
    Ok(encoded)
}

/// Decode a form body back into its JSON array
pub fn decode_body(body: &str) -> TelemetryResult<Vec<Value>> {
    let data = body
        .strip_prefix("data=")
        .ok_or_else(|| TelemetryError::Serialization("missing data field".to_string()))?;
    let b64 = urlencoding::decode(data)
        .map_err(|e| TelemetryError::Serialization(e.to_string()))?;
    let json = STANDARD
        .decode(b64.as_bytes())
        .map_err(|e| TelemetryError::Serialization(e.to_string()))?;

    match serde_json::from_slice(&json)? {
        Value::Array(items) => Ok(items),
        _ => Err(TelemetryError::Serialization("batch is not an array".to_string())),
    }
}
