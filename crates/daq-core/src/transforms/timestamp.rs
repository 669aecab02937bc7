//! Prepend the current wall-clock time to text records.

use crate::error::DaqError;
use crate::transform::{Transform, map_records};
use async_trait::async_trait;
use das_record::{Format, Record, timestamp};
use tracing::warn;

pub struct TimestampTransform {
    time_format: String,
    sep: String,
}

impl TimestampTransform {
    /// `time_format` is a chrono format string; the archive default is
    /// [`timestamp::TIME_FORMAT`].
    pub fn new(time_format: Option<&str>, sep: &str) -> Self {
        TimestampTransform {
            time_format: time_format.unwrap_or(timestamp::TIME_FORMAT).to_owned(),
            sep: sep.to_owned(),
        }
    }
}

impl Default for TimestampTransform {
    fn default() -> Self {
        Self::new(None, " ")
    }
}

#[async_trait]
impl Transform for TimestampTransform {
    fn input_format(&self) -> Format {
        Format::Text
    }

    fn output_format(&self) -> Format {
        Format::Text
    }

    async fn transform(&self, record: Record) -> Result<Option<Record>, DaqError> {
        let now = chrono::Utc::now().format(&self.time_format).to_string();
        map_records(record, &|record| match record {
            Record::Text(text) => Ok(Some(Record::Text(format!("{now}{}{text}", self.sep)))),
            other => {
                warn!(record = ?other, "timestamp transform received non-text record");
                Ok(None)
            }
        })
    }
}
