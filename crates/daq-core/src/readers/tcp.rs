//! Single-connection inbound TCP reader.

use crate::encoding::{Encoding, EncodingErrors, decode_bytes};
use crate::error::DaqError;
use crate::reader::Reader;
use async_trait::async_trait;
use das_record::{Format, Record};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 4096;

/// How records are framed on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpFraming {
    /// Buffer until the EOL byte sequence and return whole records.
    Eol(Vec<u8>),
    /// Return up to `size` bytes per read (whatever recv delivers).
    Size(usize),
}

/// Accepts a single inbound connection and reads records from it.  A
/// zero-length recv means the peer disconnected; the listener is re-armed
/// and the next record comes from whichever client connects next.
pub struct TcpReader {
    listener: TcpListener,
    conn: Option<TcpStream>,
    framing: TcpFraming,
    buffer: Vec<u8>,
    encoding: Encoding,
    encoding_errors: EncodingErrors,
}

impl TcpReader {
    pub async fn bind(
        interface: &str,
        port: u16,
        framing: TcpFraming,
        encoding: Encoding,
        encoding_errors: EncodingErrors,
    ) -> Result<Self, DaqError> {
        if let TcpFraming::Size(0) = framing {
            return Err(DaqError::Config("read size must be non-zero".to_owned()));
        }
        let interface = if interface.is_empty() { "0.0.0.0" } else { interface };
        let listener = TcpListener::bind((interface, port))
            .await
            .map_err(|err| DaqError::Fatal(format!("cannot bind {interface}:{port}: {err}")))?;
        Ok(TcpReader {
            listener,
            conn: None,
            framing,
            buffer: Vec::new(),
            encoding,
            encoding_errors,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, DaqError> {
        Ok(self.listener.local_addr()?)
    }

    async fn ensure_connected(&mut self) -> Result<(), DaqError> {
        if self.conn.is_none() {
            let (stream, peer) = self.listener.accept().await?;
            info!(%peer, "accepted connection");
            self.conn = Some(stream);
        }
        Ok(())
    }

    /// One recv; `Ok(None)` means the peer disconnected and the connection
    /// has been dropped for re-arming.
    async fn recv_chunk(&mut self, size: usize) -> Result<Option<Vec<u8>>, DaqError> {
        let conn = self.conn.as_mut().expect("connected before recv");
        let mut chunk = vec![0u8; size];
        match conn.read(&mut chunk).await {
            Ok(0) => {
                warn!("peer disconnected; re-arming listener");
                self.conn = None;
                Ok(None)
            }
            Ok(count) => {
                chunk.truncate(count);
                debug!(count, "received bytes");
                Ok(Some(chunk))
            }
            Err(err) => {
                warn!(error = %err, "recv failed; re-arming listener");
                self.conn = None;
                Ok(None)
            }
        }
    }

    /// Pull the first EOL-terminated record out of the buffer, if complete.
    fn take_buffered_record(&mut self, eol: &[u8]) -> Option<Vec<u8>> {
        let position = find_subsequence(&self.buffer, eol)?;
        let record = self.buffer[..position].to_vec();
        self.buffer.drain(..position + eol.len());
        Some(record)
    }
}

#[async_trait]
impl Reader for TcpReader {
    fn output_format(&self) -> Format {
        Format::Text
    }

    async fn read(&mut self) -> Result<Option<Record>, DaqError> {
        loop {
            self.ensure_connected().await?;
            match &self.framing {
                TcpFraming::Size(size) => {
                    let size = *size;
                    if let Some(chunk) = self.recv_chunk(size).await? {
                        return decode_bytes(&chunk, self.encoding, self.encoding_errors)
                            .map(Some);
                    }
                    // Disconnected: accept the next client.
                }
                TcpFraming::Eol(eol) => {
                    let eol = eol.clone();
                    if let Some(record) = self.take_buffered_record(&eol) {
                        return decode_bytes(&record, self.encoding, self.encoding_errors)
                            .map(Some);
                    }
                    if let Some(chunk) = self.recv_chunk(READ_BUFFER_SIZE).await? {
                        self.buffer.extend_from_slice(&chunk);
                    }
                }
            }
        }
    }
}

/// Index of the first occurrence of `needle` in `haystack`.
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn reader_on_free_port(framing: TcpFraming) -> (TcpReader, std::net::SocketAddr) {
        let reader = TcpReader::bind(
            "127.0.0.1",
            0,
            framing,
            Encoding::Utf8,
            EncodingErrors::Ignore,
        )
        .await
        .unwrap();
        let addr = reader.local_addr().unwrap();
        (reader, addr)
    }

    #[tokio::test]
    async fn eol_framing_splits_and_buffers_across_sends() {
        let (mut reader, addr) = reader_on_free_port(TcpFraming::Eol(b"\n".to_vec())).await;

        let writer = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"rec-1\nrec").await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            stream.write_all(b"-2\n").await.unwrap();
            stream.flush().await.unwrap();
            // Keep the connection open until the reader is done.
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        });

        let first = reader.read().await.unwrap().unwrap();
        assert_eq!(first.as_text().unwrap(), "rec-1");
        let second = reader.read().await.unwrap().unwrap();
        assert_eq!(second.as_text().unwrap(), "rec-2");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_re_arms_for_the_next_client() {
        let (mut reader, addr) = reader_on_free_port(TcpFraming::Eol(b"\n".to_vec())).await;

        {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"from-first\n").await.unwrap();
            stream.flush().await.unwrap();
            let record = reader.read().await.unwrap().unwrap();
            assert_eq!(record.as_text().unwrap(), "from-first");
            // Dropping the stream sends FIN.
        }

        let second_client = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"from-second\n").await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        });

        let record = tokio::time::timeout(std::time::Duration::from_secs(5), reader.read())
            .await
            .expect("reader should re-arm and accept the second client")
            .unwrap()
            .unwrap();
        assert_eq!(record.as_text().unwrap(), "from-second");
        second_client.await.unwrap();
    }

    #[tokio::test]
    async fn size_framing_returns_whatever_recv_delivers() {
        let (mut reader, addr) = reader_on_free_port(TcpFraming::Size(4)).await;

        let writer = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"abcdefgh").await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        });

        let mut collected = String::new();
        while collected.len() < 8 {
            let record = reader.read().await.unwrap().unwrap();
            let text = record.as_text().unwrap().to_owned();
            assert!(text.len() <= 4);
            collected.push_str(&text);
        }
        assert_eq!(collected, "abcdefgh");
        writer.await.unwrap();
    }

    #[test]
    fn subsequence_search_finds_multi_byte_eol() {
        assert_eq!(find_subsequence(b"ab\r\ncd", b"\r\n"), Some(2));
        assert_eq!(find_subsequence(b"abcd", b"\r\n"), None);
        assert_eq!(find_subsequence(b"", b"\n"), None);
    }

    #[tokio::test]
    async fn zero_read_size_is_a_config_error() {
        let result = TcpReader::bind(
            "127.0.0.1",
            0,
            TcpFraming::Size(0),
            Encoding::Utf8,
            EncodingErrors::Ignore,
        )
        .await;
        assert!(matches!(result, Err(DaqError::Config(_))));
    }
}
