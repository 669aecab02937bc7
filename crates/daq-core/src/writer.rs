//! The Writer contract.

use crate::error::DaqError;
use async_trait::async_trait;
use das_record::{Format, Record};

/// An abstract sink of records.
///
/// Writers must treat empty records as no-ops and `Record::Many` by writing
/// each element in order.
#[async_trait]
pub trait Writer: Send {
    fn input_format(&self) -> Format {
        Format::Unknown
    }

    /// Can this sink accept records of `source_format`?  False whenever
    /// either side is `Unknown`.
    fn can_accept(&self, source_format: Format) -> bool {
        self.input_format().can_accept(source_format)
    }

    async fn write(&mut self, record: Record) -> Result<(), DaqError>;
}
