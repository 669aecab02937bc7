//! Encode canonical records as JSON text.

use crate::error::DaqError;
use crate::transform::{Transform, map_records};
use async_trait::async_trait;
use das_record::{Format, Record};

/// Canonical records become their JSON encoding; text passes through
/// unchanged.
#[derive(Default)]
pub struct ToJsonTransform;

impl ToJsonTransform {
    pub fn new() -> Self {
        ToJsonTransform
    }
}

#[async_trait]
impl Transform for ToJsonTransform {
    fn input_format(&self) -> Format {
        Format::NativeRecord
    }

    fn output_format(&self) -> Format {
        Format::JsonRecord
    }

    async fn transform(&self, record: Record) -> Result<Option<Record>, DaqError> {
        map_records(record, &|record| match record {
            Record::Das(record) => Ok(Some(Record::Text(record.to_json()?))),
            other => Ok(Some(other)),
        })
    }
}
