//! UDP broadcast/multicast reader with fragment reassembly.

use crate::encoding::{Encoding, EncodingErrors, decode_bytes};
use crate::error::DaqError;
use crate::reader::Reader;
use crate::readers::tcp::find_subsequence;
use crate::writers::FRAGMENT_MARKER;
use async_trait::async_trait;
use das_record::{Format, Record};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::Ipv4Addr;
use tokio::net::UdpSocket;
use tracing::debug;

pub const READ_BUFFER_SIZE: usize = 4096;

/// Reads datagrams from a UDP port, optionally subscribed to a multicast
/// group.
///
/// Without an EOL, one (reassembled) datagram is one record.  With an EOL,
/// payloads are buffered across datagrams and split at the EOL sequence.
/// Datagrams suffixed with the fragment marker are partial records: their
/// payloads are concatenated until a datagram arrives without the marker.
pub struct UdpReader {
    socket: UdpSocket,
    eol: Option<Vec<u8>>,
    read_buffer_size: usize,
    /// Carry-over for EOL framing.
    record_buffer: Vec<u8>,
    encoding: Encoding,
    encoding_errors: EncodingErrors,
}

impl UdpReader {
    /// `source` empty listens for broadcast; otherwise it names a multicast
    /// group to subscribe to.
    pub fn new(
        port: u16,
        source: &str,
        eol: Option<&[u8]>,
        read_buffer_size: usize,
        encoding: Encoding,
        encoding_errors: EncodingErrors,
    ) -> Result<Self, DaqError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_broadcast(true)?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        let bind_ip: Ipv4Addr = if source.is_empty() {
            Ipv4Addr::UNSPECIFIED
        } else {
            let group: Ipv4Addr = source
                .parse()
                .map_err(|_| DaqError::Config(format!("bad multicast group {source:?}")))?;
            socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
            group
        };
        socket
            .bind(&std::net::SocketAddr::from((bind_ip, port)).into())
            .map_err(|err| DaqError::Fatal(format!("cannot bind UDP port {port}: {err}")))?;
        socket.set_nonblocking(true)?;

        Ok(UdpReader {
            socket: UdpSocket::from_std(socket.into())?,
            eol: eol.map(<[u8]>::to_vec),
            read_buffer_size: read_buffer_size.max(READ_BUFFER_SIZE),
            record_buffer: Vec::new(),
            encoding,
            encoding_errors,
        })
    }

    pub fn local_port(&self) -> Result<u16, DaqError> {
        Ok(self.socket.local_addr()?.port())
    }

    async fn recv_datagram(&mut self) -> Result<Vec<u8>, DaqError> {
        let mut buffer = vec![0u8; self.read_buffer_size];
        let (count, _peer) = self.socket.recv_from(&mut buffer).await?;
        debug!(count, "received datagram");
        buffer.truncate(count);
        Ok(buffer)
    }

    /// Receive one complete payload, reassembling marked fragments.
    async fn recv_payload(&mut self) -> Result<Vec<u8>, DaqError> {
        let mut payload = Vec::new();
        loop {
            let datagram = self.recv_datagram().await?;
            if datagram.ends_with(FRAGMENT_MARKER) {
                payload.extend_from_slice(&datagram[..datagram.len() - FRAGMENT_MARKER.len()]);
                continue;
            }
            payload.extend_from_slice(&datagram);
            return Ok(payload);
        }
    }
}

#[async_trait]
impl Reader for UdpReader {
    fn output_format(&self) -> Format {
        Format::Text
    }

    async fn read(&mut self) -> Result<Option<Record>, DaqError> {
        let Some(eol) = self.eol.clone() else {
            let payload = self.recv_payload().await?;
            return decode_bytes(&payload, self.encoding, self.encoding_errors).map(Some);
        };

        loop {
            if let Some(position) = find_subsequence(&self.record_buffer, &eol) {
                let record: Vec<u8> = self.record_buffer[..position].to_vec();
                self.record_buffer.drain(..position + eol.len());
                return decode_bytes(&record, self.encoding, self.encoding_errors).map(Some);
            }
            let payload = self.recv_payload().await?;
            self.record_buffer.extend_from_slice(&payload);
        }
    }
}
