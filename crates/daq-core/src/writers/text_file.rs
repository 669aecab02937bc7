//! Append text records to a file (or stdout), with optional daily rotation.

use crate::error::DaqError;
use crate::writer::Writer;
use async_trait::async_trait;
use das_record::{Format, Record, timestamp};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Writes one newline-terminated line per record.  With `split_by_date`,
/// the active file is `<filename>-YYYY-MM-DD` (UTC, from the wall clock at
/// write time); the date rolling over just switches files, no reopen needed
/// between same-day writes.
pub struct TextFileWriter {
    filename: Option<String>,
    split_by_date: bool,
    flush: bool,
    truncate: bool,
    current: Option<(String, tokio::fs::File)>,
}

impl TextFileWriter {
    /// `filename: None` writes to stdout.
    pub fn new(filename: Option<&str>, flush: bool, truncate: bool, split_by_date: bool) -> Self {
        TextFileWriter {
            filename: filename.map(ToOwned::to_owned),
            split_by_date,
            flush,
            truncate,
            current: None,
        }
    }

    fn active_suffix(&self) -> String {
        if self.split_by_date {
            timestamp::date_str(timestamp::now())
        } else {
            String::new()
        }
    }

    async fn ensure_open(&mut self) -> Result<(), DaqError> {
        let Some(base) = &self.filename else {
            return Ok(());
        };
        let suffix = self.active_suffix();
        if let Some((current_suffix, _file)) = &self.current
            && *current_suffix == suffix
        {
            return Ok(());
        }

        let path = if suffix.is_empty() {
            base.clone()
        } else {
            format!("{base}-{suffix}")
        };
        info!(path, "opening output file");
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        // Truncation applies only to the very first open.
        if self.truncate && self.current.is_none() {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options
            .open(&path)
            .await
            .map_err(|err| DaqError::Fatal(format!("cannot open {path:?}: {err}")))?;
        self.current = Some((suffix, file));
        Ok(())
    }

    async fn write_line(&mut self, mut line: Vec<u8>) -> Result<(), DaqError> {
        line.push(b'\n');
        self.ensure_open().await?;
        match &mut self.current {
            Some((_suffix, file)) => {
                file.write_all(&line).await?;
                if self.flush {
                    file.flush().await?;
                }
            }
            None => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&line).await?;
                stdout.flush().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Writer for TextFileWriter {
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
        let line = record.to_wire_bytes()?;
        self.write_line(line).await
    }
}
