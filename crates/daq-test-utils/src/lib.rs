// daq-test-utils: test doubles for pipeline suites.
//
// Scripted readers and capture writers satisfy the Reader/Writer contracts
// without touching the network; the ws client drives a Cached Data Server
// the way a web client would.

mod ws_client;

pub use ws_client::WsTestClient;

use async_trait::async_trait;
use daq_core::error::DaqError;
use daq_core::reader::Reader;
use daq_core::writer::Writer;
use das_record::{Format, Record};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Yields a fixed list of records, optionally pausing before each one,
/// then returns end-of-stream forever.
pub struct ScriptedReader {
    records: VecDeque<Record>,
    delay: Option<Duration>,
    format: Format,
}

impl ScriptedReader {
    pub fn new(records: Vec<Record>) -> Self {
        ScriptedReader {
            records: records.into(),
            delay: None,
            format: Format::Text,
        }
    }

    pub fn from_texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|text| Record::from(*text)).collect())
    }

    /// Pause this long before every record, simulating a slow source.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }
}

#[async_trait]
impl Reader for ScriptedReader {
    fn output_format(&self) -> Format {
        self.format
    }

    async fn read(&mut self) -> Result<Option<Record>, DaqError> {
        if self.records.is_empty() {
            return Ok(None);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.records.pop_front())
    }
}

/// Collects everything written to it; the handle can be read from the test
/// while a clone sits inside the pipeline.
#[derive(Clone, Default)]
pub struct CaptureWriter {
    records: Arc<Mutex<Vec<Record>>>,
}

impl CaptureWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.records()
            .iter()
            .map(|record| record.as_text().unwrap_or("<non-text>").to_owned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Writer for CaptureWriter {
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
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_reader_is_sticky_at_end_of_stream() {
        let mut reader = ScriptedReader::from_texts(&["a"]);
        assert!(reader.read().await.unwrap().is_some());
        assert!(reader.read().await.unwrap().is_none());
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn capture_writer_flattens_lists() {
        let mut writer = CaptureWriter::new();
        writer
            .write(Record::Many(vec![
                Record::Text("a".into()),
                Record::Text("b".into()),
            ]))
            .await
            .unwrap();
        assert_eq!(writer.texts(), ["a", "b"]);
    }
}
