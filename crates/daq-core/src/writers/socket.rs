//! Unix-domain datagram writer for named local channels.

use crate::error::{DaqError, WarningLimiter};
use crate::readers::socket::channel_path;
use crate::writer::Writer;
use async_trait::async_trait;
use das_record::{Format, Record};
use std::path::PathBuf;
use tokio::net::UnixDatagram;
use tracing::{error, info};

/// Sends each record as one datagram to the channel's socket path.  With no
/// reader bound, sends fail and are dropped subject to the warning limit.
pub struct SocketWriter {
    socket: UnixDatagram,
    path: PathBuf,
    limiter: WarningLimiter,
}

impl SocketWriter {
    pub fn new(channel: &str, warning_limit: u32) -> Result<Self, DaqError> {
        Ok(SocketWriter {
            socket: UnixDatagram::unbound()?,
            path: channel_path(channel),
            limiter: WarningLimiter::new(warning_limit),
        })
    }

    async fn send(&mut self, payload: &[u8]) {
        match self.socket.send_to(payload, &self.path).await {
            Ok(_sent) => {
                if self.limiter.on_success() {
                    info!(path = %self.path.display(), "channel sends succeeding again");
                }
            }
            Err(err) => {
                if self.limiter.on_failure() {
                    error!(path = %self.path.display(), error = %err, "channel send failed");
                    if self.limiter.just_muted() {
                        error!("muting further channel send errors");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Writer for SocketWriter {
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
        let payload = record.to_wire_bytes()?;
        self.send(&payload).await;
        Ok(())
    }
}
