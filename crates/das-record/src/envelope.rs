//! Wire-form record envelopes and their normalization into canonical records.
//!
//! Records arrive in four interchangeable shapes:
//!
//! 1. a canonical record (`DasRecord` as a JSON object),
//! 2. a mapping with optional `timestamp`/`data_id` and mandatory `fields`
//!    of field:scalar pairs,
//! 3. the batched form of (2), where a field's value is a list of
//!    `[timestamp, value]` pairs and each inner timestamp overrides the
//!    envelope timestamp,
//! 4. a JSON string encoding any of the above.
//!
//! A JSON array of any of these shapes is accepted anywhere a single record
//! is, and is normalized element-by-element in order.  The parser is
//! permissive: it extracts the envelope keys it knows and leaves every other
//! value opaque.

use crate::record::DasRecord;
use crate::timestamp;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("record is not an object, array, or JSON string")]
    UnsupportedShape,
    #[error("record has no \"fields\" key")]
    MissingFields,
    #[error("\"fields\" is not an object")]
    MalformedFields,
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One of the four accepted wire forms, classified but not yet normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEnvelope {
    Canonical(DasRecord),
    FieldDict(FieldDict),
    Batched(FieldDict),
    EncodedJson(String),
}

/// Shared shape of forms (2) and (3): the distinction is whether field
/// values are scalars or `[timestamp, value]` pair lists, and a single
/// record may mix the two.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldDict {
    pub data_id: Option<String>,
    pub timestamp: Option<f64>,
    pub fields: Map<String, Value>,
    pub metadata: Option<Map<String, Value>>,
}

impl RecordEnvelope {
    /// Classify a JSON value as one of the four envelope forms.
    ///
    /// Top-level arrays are handled by [`normalize_value`], not here.
    pub fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        match value {
            Value::String(text) => Ok(RecordEnvelope::EncodedJson(text.clone())),
            Value::Object(object) => Self::from_object(object),
            _ => Err(EnvelopeError::UnsupportedShape),
        }
    }

    fn from_object(object: &Map<String, Value>) -> Result<Self, EnvelopeError> {
        let fields = match object.get("fields") {
            Some(Value::Object(fields)) => fields.clone(),
            Some(_) => return Err(EnvelopeError::MalformedFields),
            None => return Err(EnvelopeError::MissingFields),
        };

        let dict = FieldDict {
            data_id: object
                .get("data_id")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            timestamp: object.get("timestamp").and_then(Value::as_f64),
            metadata: object
                .get("metadata")
                .and_then(Value::as_object)
                .cloned(),
            fields,
        };

        if dict.fields.values().any(is_pair_list) {
            return Ok(RecordEnvelope::Batched(dict));
        }

        // A full canonical record names its own timestamp; a bare field
        // dict may omit it.
        if dict.timestamp.is_some() {
            let record = DasRecord {
                data_id: dict.data_id,
                message_type: object
                    .get("message_type")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                timestamp: dict.timestamp.unwrap_or_else(timestamp::now),
                fields: dict.fields,
                metadata: dict.metadata,
            };
            Ok(RecordEnvelope::Canonical(record))
        } else {
            Ok(RecordEnvelope::FieldDict(dict))
        }
    }

    /// Normalize this envelope into canonical records.
    ///
    /// The batched form yields one record per distinct inner timestamp, in
    /// order of first appearance; metadata rides on the first record.
    pub fn normalize(self) -> Result<Vec<DasRecord>, EnvelopeError> {
        match self {
            RecordEnvelope::Canonical(record) => Ok(vec![record]),
            RecordEnvelope::FieldDict(dict) | RecordEnvelope::Batched(dict) => {
                normalize_field_dict(dict)
            }
            RecordEnvelope::EncodedJson(text) => {
                let value: Value = serde_json::from_str(&text)?;
                if value.is_string() {
                    // One level of string encoding is enough.
                    return Err(EnvelopeError::UnsupportedShape);
                }
                normalize_value(&value)
            }
        }
    }
}

/// Normalize any accepted JSON value (a single envelope or an array of
/// them) into canonical records, in order.
pub fn normalize_value(value: &Value) -> Result<Vec<DasRecord>, EnvelopeError> {
    if let Value::Array(elements) = value {
        let mut records = Vec::new();
        for element in elements {
            records.extend(normalize_value(element)?);
        }
        return Ok(records);
    }
    RecordEnvelope::from_value(value)?.normalize()
}

/// A batched field value is a non-empty array of `[timestamp, value]` pairs.
fn is_pair_list(value: &Value) -> bool {
    match value {
        Value::Array(elements) => !elements.is_empty() && elements.iter().all(is_pair),
        _ => false,
    }
}

fn is_pair(value: &Value) -> bool {
    match value {
        Value::Array(pair) => pair.len() == 2 && pair[0].is_number(),
        _ => false,
    }
}

fn normalize_field_dict(dict: FieldDict) -> Result<Vec<DasRecord>, EnvelopeError> {
    let envelope_timestamp = dict.timestamp.unwrap_or_else(timestamp::now);

    // Group (timestamp, field, value) triples by timestamp, preserving the
    // order in which each timestamp first appears.  Scalar values land on
    // the envelope timestamp.
    let mut groups: Vec<(f64, Map<String, Value>)> = Vec::new();
    let mut insert = |ts: f64, field: &str, value: Value| {
        match groups.iter_mut().find(|(existing, _)| *existing == ts) {
            Some((_, fields)) => {
                fields.insert(field.to_owned(), value);
            }
            None => {
                let mut fields = Map::new();
                fields.insert(field.to_owned(), value);
                groups.push((ts, fields));
            }
        }
    };

    for (field, value) in &dict.fields {
        if is_pair_list(value) {
            for pair in value.as_array().into_iter().flatten() {
                let pair = pair.as_array().expect("checked by is_pair_list");
                let ts = pair[0].as_f64().expect("checked by is_pair_list");
                insert(ts, field, pair[1].clone());
            }
        } else {
            insert(envelope_timestamp, field, value.clone());
        }
    }

    let mut records: Vec<DasRecord> = groups
        .into_iter()
        .map(|(ts, fields)| DasRecord {
            data_id: dict.data_id.clone(),
            message_type: None,
            timestamp: ts,
            fields,
            metadata: None,
        })
        .collect();

    // No fields at all still yields one (empty) record so that metadata can
    // be delivered.
    if records.is_empty() {
        records.push(DasRecord {
            data_id: dict.data_id.clone(),
            message_type: None,
            timestamp: envelope_timestamp,
            fields: Map::new(),
            metadata: None,
        });
    }

    if let Some(metadata) = dict.metadata {
        records[0].metadata = Some(metadata);
    }

    Ok(records)
}
