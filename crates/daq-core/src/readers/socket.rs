//! Unix-domain datagram reader for named local channels.
//!
//! A channel name maps to a socket path under the system temp directory.
//! The path is reference-counted process-wide; the last reader to close
//! unlinks it.

use crate::encoding::{Encoding, EncodingErrors, decode_bytes};
use crate::error::DaqError;
use crate::reader::Reader;
use async_trait::async_trait;
use das_record::{Format, Record};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tokio::net::UnixDatagram;
use tracing::{debug, warn};

static CHANNEL_REFS: OnceLock<Mutex<HashMap<String, usize>>> = OnceLock::new();

fn channel_refs() -> &'static Mutex<HashMap<String, usize>> {
    CHANNEL_REFS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Socket path for a channel: a stable hash of the name under the temp dir.
pub(crate) fn channel_path(channel: &str) -> PathBuf {
    let digest = Sha256::digest(channel.as_bytes());
    let tag: String = digest
        .iter()
        .take(4)
        .map(|byte| format!("{byte:02x}"))
        .collect();
    std::env::temp_dir().join(format!("daq_channel_{tag}"))
}

pub struct SocketReader {
    socket: UnixDatagram,
    channel: String,
    buffer_size: usize,
    encoding: Encoding,
    encoding_errors: EncodingErrors,
}

impl SocketReader {
    pub fn new(
        channel: &str,
        buffer_size: usize,
        encoding: Encoding,
        encoding_errors: EncodingErrors,
    ) -> Result<Self, DaqError> {
        let path = channel_path(channel);
        let socket = match UnixDatagram::bind(&path) {
            Ok(socket) => socket,
            Err(_) if path.exists() => {
                // A previous process died without unlinking; reclaim it.
                std::fs::remove_file(&path)?;
                UnixDatagram::bind(&path)
                    .map_err(|err| DaqError::Fatal(format!("cannot bind {path:?}: {err}")))?
            }
            Err(err) => return Err(DaqError::Fatal(format!("cannot bind {path:?}: {err}"))),
        };

        *channel_refs()
            .lock()
            .unwrap()
            .entry(channel.to_owned())
            .or_insert(0) += 1;
        debug!(channel, path = %path.display(), "bound channel socket");

        Ok(SocketReader {
            socket,
            channel: channel.to_owned(),
            buffer_size,
            encoding,
            encoding_errors,
        })
    }
}

#[async_trait]
impl Reader for SocketReader {
    fn output_format(&self) -> Format {
        Format::Text
    }

    async fn read(&mut self) -> Result<Option<Record>, DaqError> {
        let mut buffer = vec![0u8; self.buffer_size];
        let count = self.socket.recv(&mut buffer).await?;
        decode_bytes(&buffer[..count], self.encoding, self.encoding_errors).map(Some)
    }
}

impl Drop for SocketReader {
    fn drop(&mut self) {
        let mut refs = channel_refs().lock().unwrap();
        let remaining = match refs.get_mut(&self.channel) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            refs.remove(&self.channel);
            let path = channel_path(&self.channel);
            if let Err(err) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "could not unlink channel socket");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_datagrams_and_unlinks_on_drop() {
        let channel = format!("test-channel-{}", std::process::id());
        let path = channel_path(&channel);

        {
            let mut reader =
                SocketReader::new(&channel, 4096, Encoding::Utf8, EncodingErrors::Ignore).unwrap();
            assert!(path.exists());

            let sender = UnixDatagram::unbound().unwrap();
            sender.send_to(b"hello channel", &path).await.unwrap();

            let record = reader.read().await.unwrap().unwrap();
            assert_eq!(record.as_text().unwrap(), "hello channel");
        }
        // Last reader closed: the path is gone.
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stale_socket_path_is_reclaimed() {
        let channel = format!("test-stale-{}", std::process::id());
        let path = channel_path(&channel);
        // Simulate a crashed process leaving its socket file behind.
        let stale = std::os::unix::net::UnixDatagram::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());

        let reader =
            SocketReader::new(&channel, 4096, Encoding::Utf8, EncodingErrors::Ignore).unwrap();
        assert!(path.exists());
        drop(reader);
        assert!(!path.exists());
    }
}
