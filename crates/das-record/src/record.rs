//! The canonical in-memory record and the pipeline record enum.

use crate::timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A timestamped bundle of field:value pairs from one data source.
///
/// `metadata`, when present, may carry a reserved `fields` key mapping
/// field names to descriptors (units, device, description, ...).  Everything
/// else in `metadata` is opaque and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DasRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    /// Seconds since the epoch; filled with the wall clock when absent.
    #[serde(default = "timestamp::now")]
    pub timestamp: f64,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl DasRecord {
    pub fn new(data_id: Option<String>, fields: Map<String, Value>) -> Self {
        DasRecord {
            data_id,
            message_type: None,
            timestamp: timestamp::now(),
            fields,
            metadata: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Decode a JSON object string into a record.  A JSON object without a
    /// `fields` key decodes to a record with empty fields; anything that is
    /// not a JSON object is an error.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The per-field descriptor map under `metadata.fields`, if any.
    pub fn field_metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get("fields"))
            .and_then(Value::as_object)
    }
}

/// What flows between pipeline stages.
///
/// Writers treat empty records as no-ops and `Many` element-by-element, in
/// order.  End-of-stream is not a `Record` variant: readers signal it by
/// returning `Ok(None)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Bytes(Vec<u8>),
    Text(String),
    Das(DasRecord),
    Many(Vec<Record>),
}

impl Record {
    /// Empty records are dropped by writers and transforms.
    pub fn is_empty(&self) -> bool {
        match self {
            Record::Bytes(bytes) => bytes.is_empty(),
            Record::Text(text) => text.is_empty(),
            Record::Das(_) => false,
            Record::Many(records) => records.iter().all(Record::is_empty),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Record::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_das(&self) -> Option<&DasRecord> {
        match self {
            Record::Das(record) => Some(record),
            _ => None,
        }
    }

    /// Render the record as bytes for a wire or file sink: text as UTF-8,
    /// bytes as-is, canonical records as their JSON encoding.
    pub fn to_wire_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Record::Bytes(bytes) => Ok(bytes.clone()),
            Record::Text(text) => Ok(text.as_bytes().to_vec()),
            Record::Das(record) => Ok(record.to_json()?.into_bytes()),
            Record::Many(records) => {
                let mut out = Vec::new();
                for record in records {
                    out.extend(record.to_wire_bytes()?);
                }
                Ok(out)
            }
        }
    }
}

impl From<String> for Record {
    fn from(text: String) -> Self {
        Record::Text(text)
    }
}

impl From<&str> for Record {
    fn from(text: &str) -> Self {
        Record::Text(text.to_owned())
    }
}

impl From<DasRecord> for Record {
    fn from(record: DasRecord) -> Self {
        Record::Das(record)
    }
}
