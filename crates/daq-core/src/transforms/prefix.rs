//! Prepend a fixed prefix to text records.

use crate::error::DaqError;
use crate::transform::{Transform, map_records};
use async_trait::async_trait;
use das_record::{Format, Record};
use tracing::warn;

pub struct PrefixTransform {
    prefix: String,
}

impl PrefixTransform {
    pub fn new(prefix: &str, sep: &str) -> Self {
        PrefixTransform {
            prefix: format!("{prefix}{sep}"),
        }
    }
}

#[async_trait]
impl Transform for PrefixTransform {
    fn input_format(&self) -> Format {
        Format::Text
    }

    fn output_format(&self) -> Format {
        Format::Text
    }

    async fn transform(&self, record: Record) -> Result<Option<Record>, DaqError> {
        map_records(record, &|record| match record {
            Record::Text(text) => Ok(Some(Record::Text(format!("{}{text}", self.prefix)))),
            other => {
                warn!(record = ?other, "prefix transform received non-text record");
                Ok(None)
            }
        })
    }
}
