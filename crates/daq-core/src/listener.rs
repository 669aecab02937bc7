//! The run loop binding a ComposedReader to a ComposedWriter.

use crate::composed_reader::ComposedReader;
use crate::composed_writer::ComposedWriter;
use crate::error::DaqError;
use crate::reader::Reader;
use crate::transform::Transform;
use crate::writer::Writer;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Reads records (in parallel across sources), passes them through the
/// transform chain, and fans them out to the writers, until quit is
/// signalled or every source has reached end-of-stream.
pub struct Listener {
    reader: ComposedReader,
    writer: ComposedWriter,
    interval: Option<Duration>,
    cancel: CancellationToken,
}

impl Listener {
    /// Transforms run on the write side, so the readers are never blocked
    /// behind a slow transform chain.
    pub fn new(
        readers: Vec<Box<dyn Reader>>,
        transforms: Vec<Box<dyn Transform>>,
        writers: Vec<Box<dyn Writer>>,
        interval: Option<Duration>,
        check_format: bool,
    ) -> Result<Self, DaqError> {
        let cancel = CancellationToken::new();
        let reader = ComposedReader::with_cancel(readers, vec![], check_format, cancel.clone())?;
        let writer = ComposedWriter::new(transforms, writers);
        Ok(Listener {
            reader,
            writer,
            interval,
            cancel,
        })
    }

    /// A clone of the quit token, for signalling from another task (or from
    /// a signal handler).  Cancelling it is idempotent.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn quit(&self) {
        self.cancel.cancel();
    }

    /// Read/transform/write until quit or end-of-stream.
    pub async fn run(&mut self) -> Result<(), DaqError> {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let read_started = Instant::now();
            let record = tokio::select! {
                _ = self.cancel.cancelled() => break,
                record = self.reader.read() => record?,
            };

            let Some(record) = record else {
                debug!("all readers returned end-of-stream");
                break;
            };
            if !record.is_empty() {
                self.writer.write(record).await?;
            }

            if let Some(interval) = self.interval {
                let elapsed = read_started.elapsed();
                if elapsed < interval {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(interval - elapsed) => {}
                    }
                }
            }
        }
        Ok(())
    }
}
