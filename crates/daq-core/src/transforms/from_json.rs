//! Decode JSON text records into canonical records.

use crate::error::DaqError;
use crate::transform::Transform;
use async_trait::async_trait;
use das_record::{Format, Record, normalize_value};
use tracing::warn;

/// Parses text through the record envelope: a JSON object becomes one
/// canonical record, a batched object or JSON array becomes several.
/// Unparseable text is dropped with a warning.
#[derive(Default)]
pub struct FromJsonTransform;

impl FromJsonTransform {
    pub fn new() -> Self {
        FromJsonTransform
    }
}

#[async_trait]
impl Transform for FromJsonTransform {
    fn input_format(&self) -> Format {
        Format::Json
    }

    fn output_format(&self) -> Format {
        Format::NativeRecord
    }

    async fn transform(&self, record: Record) -> Result<Option<Record>, DaqError> {
        match record {
            Record::Das(record) => Ok(Some(Record::Das(record))),
            Record::Text(text) => {
                let value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(error = %err, text, "dropping unparseable JSON record");
                        return Ok(None);
                    }
                };
                match normalize_value(&value) {
                    Ok(records) => {
                        let mut records: Vec<Record> =
                            records.into_iter().map(Record::Das).collect();
                        match records.len() {
                            0 => Ok(None),
                            1 => Ok(Some(records.remove(0))),
                            _ => Ok(Some(Record::Many(records))),
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, text, "dropping malformed record envelope");
                        Ok(None)
                    }
                }
            }
            Record::Many(records) => {
                let mut out = Vec::with_capacity(records.len());
                for record in records {
                    if let Some(decoded) = self.transform(record).await? {
                        out.push(decoded);
                    }
                }
                if out.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Record::Many(out)))
                }
            }
            other => {
                warn!(record = ?other, "from-json transform received non-text record");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn object_becomes_canonical_record() {
        let transform = FromJsonTransform::new();
        let text = r#"{"data_id":"gyr1","timestamp":100.0,"fields":{"heading":5}}"#;
        let out = transform.transform(Record::Text(text.into())).await.unwrap();
        let Some(Record::Das(record)) = out else {
            panic!("expected canonical record");
        };
        assert_eq!(record.data_id.as_deref(), Some("gyr1"));
        assert_eq!(record.fields["heading"], json!(5));
    }

    #[tokio::test]
    async fn batched_object_becomes_record_list() {
        let transform = FromJsonTransform::new();
        let text = r#"{"fields":{"x":[[1.0,1],[2.0,2]]}}"#;
        let out = transform.transform(Record::Text(text.into())).await.unwrap();
        let Some(Record::Many(records)) = out else {
            panic!("expected record list");
        };
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn garbage_is_dropped_not_fatal() {
        let transform = FromJsonTransform::new();
        let out = transform.transform(Record::Text("{not json".into())).await;
        assert_eq!(out.unwrap(), None);
    }
}
