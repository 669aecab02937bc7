//! Scheduled polling of register blocks from a fieldbus device.
//!
//! The poller speaks to a [`RegisterSource`] capability: anything that can
//! read a block of 16-bit registers for a (slave, function) pair.  The
//! bundled implementation is Modbus-TCP (functions 3 and 4).  Partial
//! failures degrade per-slot; a whole-slave failure yields an empty record
//! at that slave's position rather than stalling the poll cycle.

use crate::error::{Backoff, DaqError};
use crate::reader::Reader;
use async_trait::async_trait;
use das_record::{Format, Record};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterFunction {
    /// Read holding registers (function 3).
    Holding,
    /// Read input registers (function 4).
    Input,
}

impl RegisterFunction {
    fn code(self) -> u8 {
        match self {
            RegisterFunction::Holding => 3,
            RegisterFunction::Input => 4,
        }
    }
}

/// One scheduled poll: a slave, a function, and its register blocks.
#[derive(Debug, Clone)]
pub struct PollSpec {
    pub slave: u8,
    pub function: RegisterFunction,
    /// `(start, count)` register blocks.
    pub blocks: Vec<(u16, u16)>,
}

#[async_trait]
pub trait RegisterSource: Send {
    async fn read_block(
        &mut self,
        slave: u8,
        function: RegisterFunction,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, DaqError>;

    /// Drop any live connection so the next read reconnects.
    fn disconnect(&mut self);
}

// ---------------------------------------------------------------------------
// Modbus-TCP source
// ---------------------------------------------------------------------------

/// Minimal Modbus-TCP client for register reads, with capped exponential
/// reconnect backoff.
pub struct ModbusTcpSource {
    addr: String,
    stream: Option<TcpStream>,
    transaction: u16,
    backoff: Backoff,
    last_connect_failed: bool,
}

impl ModbusTcpSource {
    pub fn new(addr: &str, initial_backoff: Duration, max_backoff: Duration) -> Self {
        ModbusTcpSource {
            addr: addr.to_owned(),
            stream: None,
            transaction: 0,
            backoff: Backoff::new(initial_backoff, max_backoff),
            last_connect_failed: false,
        }
    }

    async fn ensure_connected(&mut self) -> Result<(), DaqError> {
        if self.stream.is_some() {
            return Ok(());
        }
        if self.last_connect_failed {
            tokio::time::sleep(self.backoff.next_delay()).await;
        }
        match TcpStream::connect(&self.addr).await {
            Ok(stream) => {
                debug!(addr = %self.addr, "connected");
                self.stream = Some(stream);
                self.backoff.reset();
                self.last_connect_failed = false;
                Ok(())
            }
            Err(err) => {
                self.last_connect_failed = true;
                Err(DaqError::Io(err))
            }
        }
    }
}

/// Encode a read request: MBAP header plus function / start / count.
fn encode_read_request(
    transaction: u16,
    slave: u8,
    function: RegisterFunction,
    start: u16,
    count: u16,
) -> [u8; 12] {
    let mut frame = [0u8; 12];
    frame[0..2].copy_from_slice(&transaction.to_be_bytes());
    // protocol id 0, length 6 (unit + function + start + count)
    frame[4..6].copy_from_slice(&6u16.to_be_bytes());
    frame[6] = slave;
    frame[7] = function.code();
    frame[8..10].copy_from_slice(&start.to_be_bytes());
    frame[10..12].copy_from_slice(&count.to_be_bytes());
    frame
}

/// Decode the register payload of a read response body (function byte,
/// byte count, then big-endian register values).
fn decode_read_response(body: &[u8], function: RegisterFunction) -> Result<Vec<u16>, DaqError> {
    let [func, rest @ ..] = body else {
        return Err(DaqError::Decode("empty response body".to_owned()));
    };
    if *func == function.code() | 0x80 {
        let code = rest.first().copied().unwrap_or(0);
        return Err(DaqError::Decode(format!("device exception {code}")));
    }
    if *func != function.code() {
        return Err(DaqError::Decode(format!("unexpected function {func}")));
    }
    let [byte_count, values @ ..] = rest else {
        return Err(DaqError::Decode("truncated response".to_owned()));
    };
    if values.len() != *byte_count as usize || byte_count % 2 != 0 {
        return Err(DaqError::Decode("bad response byte count".to_owned()));
    }
    Ok(values
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

#[async_trait]
impl RegisterSource for ModbusTcpSource {
    async fn read_block(
        &mut self,
        slave: u8,
        function: RegisterFunction,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, DaqError> {
        self.ensure_connected().await?;
        self.transaction = self.transaction.wrapping_add(1);
        let request = encode_read_request(self.transaction, slave, function, start, count);

        let result: Result<Vec<u16>, DaqError> = async {
            let stream = self.stream.as_mut().expect("connected above");
            stream.write_all(&request).await?;

            let mut header = [0u8; 7];
            stream.read_exact(&mut header).await?;
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            if length < 2 || length > 256 {
                return Err(DaqError::Decode(format!("bad frame length {length}")));
            }
            // The unit id is part of `length` and already consumed.
            let mut body = vec![0u8; length - 1];
            stream.read_exact(&mut body).await?;
            decode_read_response(&body, function)
        }
        .await;

        if matches!(result, Err(DaqError::Io(_))) {
            self.disconnect();
        }
        result
    }

    fn disconnect(&mut self) {
        self.stream = None;
    }
}

// ---------------------------------------------------------------------------
// RegisterPoller
// ---------------------------------------------------------------------------

/// Polls the configured blocks every `interval`, emitting one record per
/// poll spec.
///
/// Text mode joins register values with `sep`, substituting `nan` for each
/// slot of a failed block.  Binary mode emits big-endian 16-bit values with
/// zero filler for failed blocks.  A connection-level failure fails the
/// whole poll, yielding an empty record at that position.
pub struct RegisterPoller {
    source: Box<dyn RegisterSource>,
    polls: Vec<PollSpec>,
    interval: Duration,
    sep: String,
    binary: bool,
    next_read: Option<Instant>,
}

impl RegisterPoller {
    pub fn new(
        source: Box<dyn RegisterSource>,
        polls: Vec<PollSpec>,
        interval: Duration,
        sep: &str,
        binary: bool,
    ) -> Result<Self, DaqError> {
        if polls.is_empty() {
            return Err(DaqError::Config("no polls configured".to_owned()));
        }
        if polls.iter().any(|poll| poll.blocks.is_empty()) {
            return Err(DaqError::Config("poll with no register blocks".to_owned()));
        }
        Ok(RegisterPoller {
            source,
            polls,
            interval,
            sep: sep.to_owned(),
            binary,
            next_read: None,
        })
    }

    async fn poll_one(&mut self, index: usize) -> Record {
        let poll = self.polls[index].clone();
        let mut blocks: Vec<Option<Vec<u16>>> = Vec::with_capacity(poll.blocks.len());
        for (start, count) in &poll.blocks {
            match self
                .source
                .read_block(poll.slave, poll.function, *start, *count)
                .await
            {
                Ok(values) => blocks.push(Some(values)),
                Err(err @ DaqError::Io(_)) | Err(err @ DaqError::RemoteClosed) => {
                    warn!(slave = poll.slave, error = %err, "poll failed; will reconnect");
                    self.source.disconnect();
                    return Record::Text(String::new());
                }
                Err(err) => {
                    warn!(
                        slave = poll.slave,
                        start, count,
                        error = %err,
                        "block read failed"
                    );
                    blocks.push(None);
                }
            }
        }
        self.format_blocks(&poll, &blocks)
    }

    fn format_blocks(&self, poll: &PollSpec, blocks: &[Option<Vec<u16>>]) -> Record {
        if self.binary {
            let mut bytes = Vec::new();
            for (block, (_start, count)) in blocks.iter().zip(&poll.blocks) {
                match block {
                    Some(values) => {
                        for value in values {
                            bytes.extend_from_slice(&value.to_be_bytes());
                        }
                    }
                    None => bytes.extend(std::iter::repeat_n(0u8, *count as usize * 2)),
                }
            }
            return Record::Bytes(bytes);
        }

        let mut values = Vec::new();
        for (block, (_start, count)) in blocks.iter().zip(&poll.blocks) {
            match block {
                Some(block_values) => {
                    values.extend(block_values.iter().map(ToString::to_string));
                }
                None => values.extend(std::iter::repeat_n("nan".to_owned(), *count as usize)),
            }
        }
        Record::Text(values.join(&self.sep))
    }
}

#[async_trait]
impl Reader for RegisterPoller {
    fn output_format(&self) -> Format {
        Format::Text
    }

    async fn read(&mut self) -> Result<Option<Record>, DaqError> {
        if let Some(next_read) = self.next_read {
            tokio::time::sleep_until(next_read).await;
        }
        self.next_read = Some(Instant::now() + self.interval);

        let mut records = Vec::with_capacity(self.polls.len());
        for index in 0..self.polls.len() {
            records.push(self.poll_one(index).await);
        }
        if records.len() == 1 {
            return Ok(Some(records.remove(0)));
        }
        Ok(Some(Record::Many(records)))
    }
}
