//! Parallel fan-in over multiple readers, with a transform chain applied to
//! whatever comes out.
//!
//! Inner readers are only asked for a record when one is actually needed: a
//! `read()` call against an empty queue raises the `needs_record` flag,
//! which wakes one worker task per reader.  Workers park between requests
//! and exit after a short idle timeout so that a process holding a
//! ComposedReader can always terminate; the next `read()` relaunches any
//! worker that has exited.  The `needs_record` / `has_record` pair is
//! level-triggered and only changes state under the queue lock:
//!
//! ```text
//!   has = false, needs = false   quiescent
//!   has = false, needs = true    a request is outstanding, workers read
//!   has = true,  needs = true    momentary, when the needed record lands
//!   has = true,  needs = false   spare records left in the queue
//! ```
//!
//! Ordering: per inner reader, records come out in the order produced;
//! across readers the interleaving is unspecified.

use crate::error::DaqError;
use crate::reader::Reader;
use crate::transform::Transform;
use async_trait::async_trait;
use das_record::{Format, Record};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a reader worker lies dormant before shutting down and counting
/// on being restarted if/when needed.
const READER_TIMEOUT_WAIT: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Level-triggered flag on a watch channel
// ---------------------------------------------------------------------------

struct Flag {
    tx: watch::Sender<bool>,
}

impl Flag {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Flag { tx }
    }

    fn set(&self) {
        self.tx.send_replace(true);
    }

    fn clear(&self) {
        self.tx.send_replace(false);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Wait until the flag is set, or until `timeout`.  True iff the flag was
/// observed set.
async fn wait_set(rx: &mut watch::Receiver<bool>, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, rx.wait_for(|set| *set))
        .await
        .is_ok()
}

// ---------------------------------------------------------------------------
// Shared queue state
// ---------------------------------------------------------------------------

struct QueueState {
    records: VecDeque<Record>,
    /// Whether reader[i] has returned end-of-stream.
    eof: Vec<bool>,
}

struct Shared {
    queue: std::sync::Mutex<QueueState>,
    needs_record: Flag,
    has_record: Flag,
    cancel: CancellationToken,
}

// ---------------------------------------------------------------------------
// ComposedReader
// ---------------------------------------------------------------------------

pub struct ComposedReader {
    readers: Vec<Arc<tokio::sync::Mutex<Box<dyn Reader>>>>,
    transforms: Arc<Vec<Box<dyn Transform>>>,
    shared: Arc<Shared>,
    workers: Vec<Option<JoinHandle<()>>>,
    output_format: Format,
}

impl ComposedReader {
    /// With `check_format`, verify that the readers share a common output
    /// format and that the transform chain accepts it; the composed output
    /// format is then the last transform's output (or the readers' common
    /// format).  Without it, the output format is `Unknown`.
    pub fn new(
        readers: Vec<Box<dyn Reader>>,
        transforms: Vec<Box<dyn Transform>>,
        check_format: bool,
    ) -> Result<Self, DaqError> {
        Self::with_cancel(readers, transforms, check_format, CancellationToken::new())
    }

    /// Like [`ComposedReader::new`], observing an externally owned
    /// cancellation token at every suspension point.
    pub fn with_cancel(
        readers: Vec<Box<dyn Reader>>,
        transforms: Vec<Box<dyn Transform>>,
        check_format: bool,
        cancel: CancellationToken,
    ) -> Result<Self, DaqError> {
        if readers.is_empty() {
            return Err(DaqError::Config(
                "ComposedReader needs at least one reader".to_owned(),
            ));
        }

        let output_format = if check_format {
            check_reader_formats(&readers, &transforms)?
        } else {
            Format::Unknown
        };

        let count = readers.len();
        Ok(ComposedReader {
            readers: readers
                .into_iter()
                .map(|reader| Arc::new(tokio::sync::Mutex::new(reader)))
                .collect(),
            transforms: Arc::new(transforms),
            shared: Arc::new(Shared {
                queue: std::sync::Mutex::new(QueueState {
                    records: VecDeque::new(),
                    eof: vec![false; count],
                }),
                needs_record: Flag::new(),
                has_record: Flag::new(),
                cancel,
            }),
            workers: (0..count).map(|_| None).collect(),
            output_format,
        })
    }

    /// Signal quit: workers exit at their next timeout and `read()` returns
    /// end-of-stream.  Idempotent and safe from any task.
    pub fn quit(&self) {
        self.shared.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    async fn apply_transforms(&self, mut record: Record) -> Result<Option<Record>, DaqError> {
        for transform in self.transforms.iter() {
            match transform.transform(record).await {
                Ok(Some(next)) => record = next,
                Ok(None) => return Ok(None),
                Err(err) => {
                    warn!(error = %err, "transform failed; dropping record");
                    return Ok(None);
                }
            }
        }
        Ok(Some(record))
    }

    /// Relaunch the worker for any reader whose task has exited (idle
    /// timeout) and which has not yet returned end-of-stream.
    fn spawn_idle_workers(&mut self) {
        for (index, slot) in self.workers.iter_mut().enumerate() {
            let running = slot.as_ref().is_some_and(|handle| !handle.is_finished());
            if running {
                continue;
            }
            if self.shared.queue.lock().unwrap().eof[index] {
                continue;
            }
            debug!(index, "starting worker for reader");
            *slot = Some(tokio::spawn(run_reader(
                index,
                self.readers[index].clone(),
                self.shared.clone(),
            )));
        }
    }

    async fn read_single(&mut self) -> Result<Option<Record>, DaqError> {
        loop {
            let result = {
                let mut reader = self.readers[0].lock().await;
                tokio::select! {
                    _ = self.shared.cancel.cancelled() => return Ok(None),
                    result = reader.read() => result?,
                }
            };
            let Some(record) = result else {
                return Ok(None);
            };
            if let Some(record) = self.apply_transforms(record).await? {
                return Ok(Some(record));
            }
            // Transform chain dropped it; ask the reader again.
        }
    }
}

#[async_trait]
impl Reader for ComposedReader {
    fn output_format(&self) -> Format {
        self.output_format
    }

    async fn read(&mut self) -> Result<Option<Record>, DaqError> {
        // A single reader needs none of the queue machinery.
        if self.readers.len() == 1 {
            return self.read_single().await;
        }

        let mut has_rx = self.shared.has_record.subscribe();
        loop {
            let (popped, all_eof) = {
                let mut queue = self.shared.queue.lock().unwrap();
                let popped = queue.records.pop_front();
                if queue.records.is_empty() {
                    // Only set/clear under the queue lock.
                    self.shared.has_record.clear();
                }
                (popped, queue.eof.iter().all(|done| *done))
            };

            if let Some(record) = popped {
                match self.apply_transforms(record).await? {
                    Some(record) => return Ok(Some(record)),
                    None => continue,
                }
            }

            if all_eof || self.shared.cancel.is_cancelled() {
                return Ok(None);
            }

            self.spawn_idle_workers();
            self.shared.needs_record.set();
            let _ = wait_set(&mut has_rx, READER_TIMEOUT_WAIT).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Worker task: one per inner reader, at most one read in flight
// ---------------------------------------------------------------------------

async fn run_reader(
    index: usize,
    reader: Arc<tokio::sync::Mutex<Box<dyn Reader>>>,
    shared: Arc<Shared>,
) {
    let mut needs_rx = shared.needs_record.subscribe();
    loop {
        if !wait_set(&mut needs_rx, READER_TIMEOUT_WAIT).await {
            debug!(index, "reader worker idle timeout; exiting");
            return;
        }
        if shared.cancel.is_cancelled() {
            return;
        }

        // The per-reader mutex guards against re-entry.
        let result = {
            let mut guard = reader.lock().await;
            tokio::select! {
                _ = shared.cancel.cancelled() => return,
                result = guard.read() => result,
            }
        };

        match result {
            Ok(Some(record)) => {
                let queue_is = {
                    let mut queue = shared.queue.lock().unwrap();
                    queue.records.push_back(record);
                    shared.has_record.set();
                    shared.needs_record.clear();
                    queue.records.len()
                };
                debug!(index, queue_len = queue_is, "worker enqueued record");
            }
            Ok(None) => {
                info!(index, "reader returned end-of-stream");
                let mut queue = shared.queue.lock().unwrap();
                queue.eof[index] = true;
                // Wake the consumer so it can notice completion.
                shared.has_record.set();
                return;
            }
            Err(err) => {
                warn!(index, error = %err, "reader failed; treating as end-of-stream");
                let mut queue = shared.queue.lock().unwrap();
                queue.eof[index] = true;
                shared.has_record.set();
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Format checking
// ---------------------------------------------------------------------------

fn check_reader_formats(
    readers: &[Box<dyn Reader>],
    transforms: &[Box<dyn Transform>],
) -> Result<Format, DaqError> {
    let mut common = readers[0].output_format();
    for reader in readers {
        common = common.common(reader.output_format()).ok_or_else(|| {
            DaqError::Config(format!(
                "no common output format among readers: {:?}",
                readers
                    .iter()
                    .map(|reader| reader.output_format())
                    .collect::<Vec<_>>()
            ))
        })?;
    }

    for transform in transforms {
        if !transform.input_format().can_accept(common) {
            return Err(DaqError::Config(format!(
                "transform accepting {:?} cannot take input format {common:?}",
                transform.input_format()
            )));
        }
        common = transform.output_format();
    }
    Ok(common)
}
