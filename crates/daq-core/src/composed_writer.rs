//! Series transforms feeding a parallel fan-out to multiple writers.
//!
//! Transforms run in order; any of them may drop the record.  The surviving
//! record is dispatched to every writer concurrently, with a per-writer
//! mutex so that a slow writer never has overlapping `write` calls.  One
//! writer failing is logged and does not keep the record from the others.

use crate::error::DaqError;
use crate::transform::Transform;
use crate::writer::Writer;
use async_trait::async_trait;
use das_record::{Format, Record};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

pub struct ComposedWriter {
    transforms: Vec<Box<dyn Transform>>,
    writers: Vec<Arc<Mutex<Box<dyn Writer>>>>,
    input_format: Format,
}

impl ComposedWriter {
    pub fn new(transforms: Vec<Box<dyn Transform>>, writers: Vec<Box<dyn Writer>>) -> Self {
        ComposedWriter {
            transforms,
            writers: writers
                .into_iter()
                .map(|writer| Arc::new(Mutex::new(writer)))
                .collect(),
            input_format: Format::Unknown,
        }
    }

    /// Declare the composed input format, checked by enclosing pipelines.
    pub fn with_input_format(mut self, format: Format) -> Self {
        self.input_format = format;
        self
    }

    async fn apply_transforms(&self, mut record: Record) -> Option<Record> {
        for transform in &self.transforms {
            match transform.transform(record).await {
                Ok(Some(next)) => record = next,
                Ok(None) => return None,
                Err(err) => {
                    warn!(error = %err, "transform failed; dropping record");
                    return None;
                }
            }
        }
        Some(record)
    }
}

#[async_trait]
impl Writer for ComposedWriter {
    fn input_format(&self) -> Format {
        self.input_format
    }

    async fn write(&mut self, record: Record) -> Result<(), DaqError> {
        if record.is_empty() {
            return Ok(());
        }
        let Some(record) = self.apply_transforms(record).await else {
            return Ok(());
        };
        if self.writers.is_empty() {
            return Ok(());
        }

        // A single writer needs no dispatch machinery.
        if self.writers.len() == 1 {
            let mut writer = self.writers[0].lock().await;
            if let Err(err) = writer.write(record).await {
                warn!(error = %err, "writer failed");
            }
            return Ok(());
        }

        let dispatches = self.writers.iter().map(|writer| {
            let writer = writer.clone();
            let record = record.clone();
            async move {
                let mut writer = writer.lock().await;
                writer.write(record).await
            }
        });
        for (index, result) in join_all(dispatches).await.into_iter().enumerate() {
            if let Err(err) = result {
                warn!(index, error = %err, "writer failed");
            }
        }
        Ok(())
    }
}
