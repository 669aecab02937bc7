//! The JSON request protocol served over the websocket.
//!
//! Every request is an object with a `type` discriminator; replies carry a
//! `status` mirroring HTTP conventions (200 success, 400 client error).

use serde::Deserialize;
use serde_json::{Map, Value, json};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Return the current field-name set.
    Fields,
    /// Return metadata descriptors, restricted to `fields` when given.
    Describe { fields: Option<Vec<String>> },
    /// Feed `data` (any accepted record envelope, or a list) into the cache.
    Publish { data: Option<Value> },
    /// Replace the connection's subscription wholesale.
    Subscribe {
        fields: Option<Map<String, Value>>,
        interval: Option<f64>,
        format: Option<String>,
    },
    /// Deliver the next batch of subscribed data.
    Ready,
}

/// Per-field subscription spec, parsed leniently: a non-object spec means
/// defaults all around.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    /// Back-window in seconds; `0` = future records only, `-1` = current
    /// most-recent value then future.
    pub seconds: f64,
    /// Deliver at least this many back records even if it means going
    /// further back than `seconds`.
    pub back_records: usize,
}

impl FieldSpec {
    pub fn parse(value: &Value) -> FieldSpec {
        let Value::Object(spec) = value else {
            return FieldSpec {
                seconds: 0.0,
                back_records: 0,
            };
        };
        FieldSpec {
            seconds: spec.get("seconds").and_then(Value::as_f64).unwrap_or(0.0),
            back_records: spec
                .get("back_records")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize,
        }
    }
}

/// Output shape for `ready` deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryFormat {
    /// `{field: [(ts, value), ...], ...}`
    #[default]
    FieldDict,
    /// `[{timestamp, fields: {...}}, ...]`, one per distinct timestamp.
    RecordList,
}

impl DeliveryFormat {
    pub fn parse(name: &str) -> Option<DeliveryFormat> {
        match name {
            "field_dict" => Some(DeliveryFormat::FieldDict),
            "record_list" => Some(DeliveryFormat::RecordList),
            _ => None,
        }
    }
}

pub fn ok_reply(kind: &str) -> Value {
    json!({"type": kind, "status": 200})
}

pub fn data_reply(kind: &str, data: Value) -> Value {
    json!({"type": kind, "status": 200, "data": data})
}

pub fn error_reply(kind: Option<&str>, error: &str) -> Value {
    match kind {
        Some(kind) => json!({"type": kind, "status": 400, "error": error}),
        None => json!({"status": 400, "error": error}),
    }
}
