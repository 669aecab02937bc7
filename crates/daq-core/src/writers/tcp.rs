//! Outbound TCP writer with on-demand connect and reconnect-on-failure.

use crate::error::{DaqError, WarningLimiter};
use crate::writer::Writer;
use async_trait::async_trait;
use das_record::{Format, Record};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// Connects lazily on the first write.  Before each send, a non-blocking
/// one-byte read probes for a half-closed socket: the peer never sends on
/// this connection, so readable-with-zero-bytes means it closed.  Failures
/// tear the connection down; the next attempt reconnects, up to `num_retry`
/// attempts per record, with failure logging muted past `warning_limit`
/// consecutive losses.
pub struct TcpWriter {
    destination: String,
    port: u16,
    num_retry: u32,
    eol: Option<String>,
    conn: Option<TcpStream>,
    limiter: WarningLimiter,
}

impl TcpWriter {
    pub fn new(
        destination: &str,
        port: u16,
        num_retry: u32,
        warning_limit: u32,
        eol: Option<&str>,
    ) -> Self {
        TcpWriter {
            destination: destination.to_owned(),
            port,
            num_retry,
            eol: eol.map(ToOwned::to_owned),
            conn: None,
            limiter: WarningLimiter::new(warning_limit),
        }
    }

    fn note_failure(&mut self, context: &str, err: &dyn std::fmt::Display) {
        if self.limiter.on_failure() {
            error!(
                destination = %self.destination,
                port = self.port,
                error = %err,
                "{context}"
            );
            if self.limiter.just_muted() {
                error!("muting further write errors");
            }
        }
    }

    fn note_success(&mut self) {
        if self.limiter.on_success() {
            info!(
                destination = %self.destination,
                port = self.port,
                "writes succeeding again after a series of failures"
            );
        }
    }

    async fn connect(&mut self) -> bool {
        match TcpStream::connect((self.destination.as_str(), self.port)).await {
            Ok(stream) => {
                debug!(destination = %self.destination, port = self.port, "connected");
                self.conn = Some(stream);
                true
            }
            Err(err) => {
                self.note_failure("unable to connect", &err);
                false
            }
        }
    }

    /// True iff the peer has half-closed the connection.  `try_read` on a
    /// connection the peer never writes to returns `WouldBlock` while it is
    /// alive and `Ok(0)` after a FIN.
    fn peer_closed(conn: &TcpStream) -> bool {
        let mut probe = [0u8; 1];
        match conn.try_read(&mut probe) {
            Ok(0) => true,
            Ok(_) => false,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }

    async fn send_once(&mut self, payload: &[u8]) -> bool {
        if self.conn.is_none() && !self.connect().await {
            return false;
        }

        let closed = self.conn.as_ref().is_none_or(Self::peer_closed);
        if closed {
            self.note_failure("connection closed by peer", &"zero-byte peek");
            self.conn = None;
            return false;
        }

        let result = self
            .conn
            .as_mut()
            .expect("connected above")
            .write_all(payload)
            .await;
        match result {
            Ok(()) => true,
            Err(err) => {
                self.note_failure("send failed", &err);
                self.conn = None;
                false
            }
        }
    }

    async fn write_single(&mut self, record: Record) -> Result<(), DaqError> {
        let mut payload = record.to_wire_bytes()?;
        if let Some(eol) = &self.eol {
            payload.extend_from_slice(eol.as_bytes());
        }

        let mut tries = 0;
        while tries <= self.num_retry {
            tries += 1;
            if self.send_once(&payload).await {
                self.note_success();
                return Ok(());
            }
        }
        // Retries exhausted: the record is dropped and the pipeline goes on.
        warn!(
            destination = %self.destination,
            port = self.port,
            tries,
            "dropping record after exhausting retries"
        );
        Ok(())
    }
}

#[async_trait]
impl Writer for TcpWriter {
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
