//! Serial-line reader over a tty device path.
//!
//! Line disciplines and port parameters (baud, parity) are left to the
//! device configuration; this reader only frames and decodes what the
//! device delivers.

use crate::encoding::{Encoding, EncodingErrors, decode_bytes};
use crate::error::DaqError;
use crate::reader::Reader;
use async_trait::async_trait;
use das_record::{Format, Record};
use tokio::io::AsyncReadExt;

/// Reads up to the EOL sequence or `max_bytes`, whichever comes first.
pub struct SerialReader {
    device: tokio::fs::File,
    eol: Option<Vec<u8>>,
    max_bytes: usize,
    buffer: Vec<u8>,
    encoding: Encoding,
    encoding_errors: EncodingErrors,
}

impl SerialReader {
    pub async fn open(
        path: &str,
        eol: Option<&[u8]>,
        max_bytes: usize,
        encoding: Encoding,
        encoding_errors: EncodingErrors,
    ) -> Result<Self, DaqError> {
        if max_bytes == 0 {
            return Err(DaqError::Config("max_bytes must be non-zero".to_owned()));
        }
        let device = tokio::fs::File::open(path)
            .await
            .map_err(|err| DaqError::Fatal(format!("cannot open device {path:?}: {err}")))?;
        Ok(SerialReader {
            device,
            eol: eol.map(<[u8]>::to_vec),
            max_bytes,
            buffer: Vec::new(),
            encoding,
            encoding_errors,
        })
    }

    /// Take the first complete record out of the buffer: up to EOL if one
    /// is present, else `max_bytes` worth.
    fn take_record(&mut self) -> Option<Vec<u8>> {
        if let Some(eol) = &self.eol
            && let Some(position) = super::tcp::find_subsequence(&self.buffer, eol)
        {
            let record = self.buffer[..position].to_vec();
            self.buffer.drain(..position + eol.len());
            return Some(record);
        }
        if self.buffer.len() >= self.max_bytes {
            let record: Vec<u8> = self.buffer.drain(..self.max_bytes).collect();
            return Some(record);
        }
        None
    }
}

#[async_trait]
impl Reader for SerialReader {
    fn output_format(&self) -> Format {
        Format::Text
    }

    async fn read(&mut self) -> Result<Option<Record>, DaqError> {
        loop {
            if let Some(record) = self.take_record() {
                return decode_bytes(&record, self.encoding, self.encoding_errors).map(Some);
            }
            let mut chunk = vec![0u8; self.max_bytes];
            let count = self.device.read(&mut chunk).await?;
            if count == 0 {
                // Device closed.  Flush whatever is buffered, then signal
                // end-of-stream.
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.buffer);
                return decode_bytes(&rest, self.encoding, self.encoding_errors).map(Some);
            }
            self.buffer.extend_from_slice(&chunk[..count]);
        }
    }
}
