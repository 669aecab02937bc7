//! Archive writer: timestamped lines under a daily-rotated filebase.

use crate::error::DaqError;
use crate::writer::Writer;
use async_trait::async_trait;
use das_record::{Format, Record, timestamp};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Writes archive lines of the form `<timestamp> <payload>` (or whole-line
/// JSON for canonical records) to `<filebase>-YYYY-MM-DD`, choosing the
/// date from the record's own timestamp.  Text records that already carry a
/// leading timestamp are written as-is; bare text is stamped with the wall
/// clock.
pub struct LogfileWriter {
    filebase: String,
    flush: bool,
    current: Option<(String, tokio::fs::File)>,
}

impl LogfileWriter {
    pub fn new(filebase: &str, flush: bool) -> Self {
        LogfileWriter {
            filebase: filebase.to_owned(),
            flush,
            current: None,
        }
    }

    async fn file_for(&mut self, seconds: f64) -> Result<&mut tokio::fs::File, DaqError> {
        let date = timestamp::date_str(seconds);
        let stale = self
            .current
            .as_ref()
            .is_none_or(|(current_date, _file)| *current_date != date);
        if stale {
            let path = format!("{}-{date}", self.filebase);
            info!(path, "opening archive file");
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|err| DaqError::Fatal(format!("cannot open {path:?}: {err}")))?;
            self.current = Some((date, file));
        }
        Ok(&mut self.current.as_mut().expect("opened above").1)
    }

    async fn write_single(&mut self, record: Record) -> Result<(), DaqError> {
        let (seconds, line) = match record {
            Record::Das(record) => (record.timestamp, record.to_json()?),
            Record::Text(text) => match leading_timestamp(&text) {
                Some(seconds) => (seconds, text),
                None => {
                    let now = timestamp::now();
                    (now, format!("{} {text}", timestamp::time_str(now)))
                }
            },
            other => {
                return Err(DaqError::Invariant(format!(
                    "archive writer cannot store {other:?}"
                )));
            }
        };

        let flush = self.flush;
        let file = self.file_for(seconds).await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        if flush {
            file.flush().await?;
        }
        Ok(())
    }
}

fn leading_timestamp(line: &str) -> Option<f64> {
    let (stamp, _payload) = line.split_once(' ')?;
    timestamp::parse_time_str(stamp).ok()
}

#[async_trait]
impl Writer for LogfileWriter {
    fn input_format(&self) -> Format {
        Format::Text
    }

    async fn write(&mut self, record: Record) -> Result<(), DaqError> {
        if record.is_empty() {
            return Ok(());
        }
        if let Record::Many(records) = record {
            for record in records {
                Box::pin(self.write(record)).await?;
            }
            return Ok(());
        }
        self.write_single(record).await
    }
}
