//! The Reader contract and its storage/time-seek capability extensions.

use crate::error::DaqError;
use async_trait::async_trait;
use das_record::{Format, Record};

/// Origin for record- and time-based seeks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

/// An abstract source of records.
///
/// `read` returns `Ok(Some(record))` for the next record and `Ok(None)` at
/// end-of-stream; once end-of-stream has been returned, every subsequent
/// call returns it too.  A reader may block indefinitely.
#[async_trait]
pub trait Reader: Send {
    fn output_format(&self) -> Format {
        Format::Unknown
    }

    async fn read(&mut self) -> Result<Option<Record>, DaqError>;
}

/// A reader over storage that can seek and fetch bounded ranges, with
/// offsets measured in records.
#[async_trait]
pub trait StorageReader: Reader {
    /// Move the read position by `offset` records relative to `origin`.
    /// Returns the new absolute position.
    async fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64, DaqError>;

    /// Read records from position `start` (default: current) up to but not
    /// including position `stop` (default: end-of-stream).
    async fn read_range(
        &mut self,
        start: Option<u64>,
        stop: Option<u64>,
    ) -> Result<Vec<Record>, DaqError>;
}

/// A storage reader whose records carry timestamps, allowing seeks and
/// ranges in milliseconds.
#[async_trait]
pub trait TimestampedReader: StorageReader {
    /// Move the read position by `offset_ms` relative to `origin`.  Returns
    /// the requested absolute time in msec, or `None` if the stream holds no
    /// timestamps.
    async fn seek_time(
        &mut self,
        offset_ms: i64,
        origin: SeekOrigin,
    ) -> Result<Option<f64>, DaqError>;

    /// Read records timestamped in `[start_ms, stop_ms)`.
    async fn read_time_range(
        &mut self,
        start_ms: Option<f64>,
        stop_ms: Option<f64>,
    ) -> Result<Vec<Record>, DaqError>;
}
