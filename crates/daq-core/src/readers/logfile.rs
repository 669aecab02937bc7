//! Timestamped replay of archived log records.
//!
//! Archive lines are either `<timestamp> <payload>` (timestamp in the
//! archive time format) or a whole-line JSON canonical record.  With
//! `use_timestamps`, records are doled out honoring the stored
//! inter-arrival gaps, clamped to non-negative.

use crate::error::DaqError;
use crate::reader::{Reader, SeekOrigin, StorageReader, TimestampedReader};
use crate::readers::TextFileReader;
use async_trait::async_trait;
use das_record::{DasRecord, Format, Record, timestamp};
use std::time::Duration;
use tracing::warn;

pub struct LogfileReader {
    reader: TextFileReader,
    filebase: Option<String>,
    tail: bool,
    refresh_file_spec: bool,
    use_timestamps: bool,
    quiet: bool,
    /// Timestamp of the last record returned; pacing state.
    last_timestamp: f64,
    /// Wall clock of the last return; pacing state.
    last_read: f64,
    first_msec: Option<f64>,
    /// Text of the last line consumed from the underlying reader, kept so
    /// that `seek_time` can work relative to it.
    prev_record: Option<String>,
}

impl LogfileReader {
    /// `filebase` is extended with a trailing wildcard to match rotated
    /// suffixes (`<base>-YYYY-MM-DD`); `None` reads stdin.
    pub fn new(
        filebase: Option<&str>,
        tail: bool,
        refresh_file_spec: bool,
        retry_interval: Duration,
        use_timestamps: bool,
        quiet: bool,
    ) -> Result<Self, DaqError> {
        let file_spec = filebase.map(|base| format!("{base}*"));
        let reader = TextFileReader::new(
            file_spec.as_deref(),
            tail,
            refresh_file_spec,
            retry_interval,
            None,
        )?;
        Ok(LogfileReader {
            reader,
            filebase: filebase.map(ToOwned::to_owned),
            tail,
            refresh_file_spec,
            use_timestamps,
            quiet,
            last_timestamp: 0.0,
            last_read: 0.0,
            first_msec: None,
            prev_record: None,
        })
    }

    /// Timestamp (msec) of an archive line: the leading timestamp if the
    /// line parses as `<timestamp> <payload>`, else the `timestamp` of a
    /// whole-line JSON record.
    fn line_msec(line: &str) -> Result<f64, DaqError> {
        if let Some(seconds) = parse_leading_timestamp(line) {
            return Ok(seconds * 1000.0);
        }
        if let Ok(record) = DasRecord::from_json(line) {
            return Ok(record.timestamp * 1000.0);
        }
        Err(DaqError::Decode(format!(
            "no timestamp found in record {line:?}"
        )))
    }

    async fn next_line(&mut self) -> Result<Option<String>, DaqError> {
        let Some(record) = self.reader.read().await? else {
            return Ok(None);
        };
        let Record::Text(line) = record else {
            return Err(DaqError::Invariant(
                "text file reader yielded a non-text record".to_owned(),
            ));
        };
        self.prev_record = Some(line.clone());
        Ok(Some(line))
    }

    /// Timestamp (msec) of the next record, leaving the position untouched.
    async fn peek_msec(&mut self) -> Result<Option<f64>, DaqError> {
        let Some(line) = self.next_line().await? else {
            return Ok(None);
        };
        self.reader.seek(-1, SeekOrigin::Current).await?;
        Self::line_msec(&line).map(Some)
    }

    /// Advance until the next record's timestamp is at or past
    /// `desired_msec`.
    async fn read_until(&mut self, desired_msec: f64) -> Result<(), DaqError> {
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(());
            };
            if Self::line_msec(&line)? >= desired_msec {
                self.reader.seek(-1, SeekOrigin::Current).await?;
                return Ok(());
            }
        }
    }

    async fn reset(&mut self) -> Result<(), DaqError> {
        self.reader.seek(0, SeekOrigin::Start).await?;
        Ok(())
    }

    async fn first_record_msec(&mut self) -> Result<Option<f64>, DaqError> {
        if let Some(first) = self.first_msec {
            return Ok(Some(first));
        }
        self.reset().await?;
        let Some(line) = self.next_line().await? else {
            return Ok(None);
        };
        let first = Self::line_msec(&line)?;
        self.first_msec = Some(first);
        Ok(Some(first))
    }
}

#[async_trait]
impl Reader for LogfileReader {
    fn output_format(&self) -> Format {
        Format::Text
    }

    async fn read(&mut self) -> Result<Option<Record>, DaqError> {
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(None);
            };

            if !self.use_timestamps {
                // A whole-line JSON record comes back decoded; anything
                // else is returned as the stored text.
                if let Ok(record) = DasRecord::from_json(&line) {
                    return Ok(Some(Record::Das(record)));
                }
                return Ok(Some(Record::Text(line)));
            }

            let (seconds, record) = if let Some(seconds) = parse_leading_timestamp(&line) {
                (seconds, Record::Text(line))
            } else if let Ok(record) = DasRecord::from_json(&line) {
                (record.timestamp, Record::Das(record))
            } else {
                if !self.quiet {
                    warn!(line, "discarding record with no parseable timestamp");
                }
                continue;
            };

            // Sleep out the stored inter-arrival gap, less however long
            // we have already spent since the previous record.
            let desired_interval = seconds - self.last_timestamp;
            let actual_interval = timestamp::now() - self.last_read;
            let pause = (desired_interval - actual_interval).max(0.0);
            if pause > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(pause)).await;
            }

            self.last_timestamp = seconds;
            self.last_read = timestamp::now();
            return Ok(Some(record));
        }
    }
}

#[async_trait]
impl StorageReader for LogfileReader {
    async fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64, DaqError> {
        self.reader.seek(offset, origin).await
    }

    async fn read_range(
        &mut self,
        start: Option<u64>,
        stop: Option<u64>,
    ) -> Result<Vec<Record>, DaqError> {
        self.reader.read_range(start, stop).await
    }
}

#[async_trait]
impl TimestampedReader for LogfileReader {
    async fn seek_time(
        &mut self,
        offset_ms: i64,
        origin: SeekOrigin,
    ) -> Result<Option<f64>, DaqError> {
        if self.filebase.is_none() {
            return Err(DaqError::Config("seek_time not allowed on stdin".to_owned()));
        }
        if origin == SeekOrigin::End && self.tail {
            return Err(DaqError::Config(
                "tail is incompatible with seeking from the end".to_owned(),
            ));
        }
        if origin == SeekOrigin::End && self.refresh_file_spec {
            return Err(DaqError::Config(
                "refresh_file_spec is incompatible with seeking from the end".to_owned(),
            ));
        }
        let offset_ms = offset_ms as f64;

        match origin {
            SeekOrigin::Start => {
                if offset_ms < 0.0 {
                    return Err(DaqError::Config(
                        "cannot seek before the earliest record".to_owned(),
                    ));
                }
                let Some(first) = self.first_record_msec().await? else {
                    return Ok(None);
                };
                let desired = first + offset_ms;
                let must_reset = match &self.prev_record {
                    None => true,
                    Some(prev) => Self::line_msec(prev)? >= desired,
                };
                if must_reset {
                    self.reset().await?;
                }
                self.read_until(desired).await?;
                Ok(Some(desired))
            }
            SeekOrigin::Current => {
                let next = self.peek_msec().await?;
                let current = match (next, &self.prev_record) {
                    (Some(msec), _) => msec,
                    (None, Some(prev)) => Self::line_msec(prev)?,
                    (None, None) => return Ok(None),
                };
                let desired = current + offset_ms;
                if offset_ms == 0.0 {
                    return Ok(Some(desired));
                }
                if offset_ms < 0.0 {
                    self.reset().await?;
                }
                self.read_until(desired).await?;
                Ok(Some(desired))
            }
            SeekOrigin::End => {
                while self.read().await?.is_some() {}
                let Some(prev) = &self.prev_record else {
                    return Ok(None);
                };
                let desired = Self::line_msec(prev)? + offset_ms;
                if offset_ms < 0.0 {
                    self.reset().await?;
                    self.read_until(desired).await?;
                }
                Ok(Some(desired))
            }
        }
    }

    async fn read_time_range(
        &mut self,
        start_ms: Option<f64>,
        stop_ms: Option<f64>,
    ) -> Result<Vec<Record>, DaqError> {
        if self.filebase.is_none() {
            return Err(DaqError::Config(
                "read_time_range not allowed on stdin".to_owned(),
            ));
        }
        if stop_ms.is_none() && (self.tail || self.refresh_file_spec) {
            return Err(DaqError::Config(
                "tail/refresh_file_spec require an explicit stop time".to_owned(),
            ));
        }

        let starting_offset = match start_ms {
            None => 0.0,
            Some(start) => match self.first_record_msec().await? {
                Some(first) => start - first,
                None => return Ok(Vec::new()),
            },
        };
        self.seek_time(starting_offset.round() as i64, SeekOrigin::Start)
            .await?;

        let mut records = Vec::new();
        loop {
            let Some(record) = self.read().await? else {
                break;
            };
            if let Some(stop) = stop_ms {
                let msec = match &record {
                    Record::Text(line) => Self::line_msec(line)?,
                    Record::Das(das) => das.timestamp * 1000.0,
                    _ => continue,
                };
                if msec >= stop {
                    break;
                }
            }
            records.push(record);
        }
        Ok(records)
    }
}

/// Parse the timestamp prefix of a `<timestamp> <payload>` line.
fn parse_leading_timestamp(line: &str) -> Option<f64> {
    let (stamp, _payload) = line.split_once(' ')?;
    timestamp::parse_time_str(stamp).ok()
}
