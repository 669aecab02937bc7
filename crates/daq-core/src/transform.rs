//! The Transform contract.

use crate::error::DaqError;
use async_trait::async_trait;
use das_record::{Format, Record};

/// A record → record(s) function between readers and writers.
///
/// Transforms take `&self` and must be callable concurrently from multiple
/// tasks; stateful transforms guard their state internally.  Returning
/// `Ok(None)` drops the record.
#[async_trait]
pub trait Transform: Send + Sync {
    fn input_format(&self) -> Format {
        Format::Unknown
    }

    fn output_format(&self) -> Format {
        Format::Unknown
    }

    async fn transform(&self, record: Record) -> Result<Option<Record>, DaqError>;
}

/// Apply a per-record function across `Record::Many` lists, recursing in
/// order and dropping elements the function filters out.  An emptied list
/// drops the whole record.
pub(crate) fn map_records(
    record: Record,
    f: &dyn Fn(Record) -> Result<Option<Record>, DaqError>,
) -> Result<Option<Record>, DaqError> {
    match record {
        Record::Many(records) => {
            let mut out = Vec::with_capacity(records.len());
            for record in records {
                if let Some(transformed) = map_records(record, f)? {
                    out.push(transformed);
                }
            }
            if out.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Record::Many(out)))
            }
        }
        record => f(record),
    }
}
