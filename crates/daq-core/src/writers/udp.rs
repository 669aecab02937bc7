//! UDP datagram writer with oversize-record fragmentation.

use crate::error::{DaqError, WarningLimiter};
use crate::writer::Writer;
use async_trait::async_trait;
use das_record::{Format, Record};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::OnceLock;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

/// Suffix marking every fragment of an oversize record except the last.
/// The reader strips markers and concatenates payloads; a datagram without
/// the marker terminates the record.
pub const FRAGMENT_MARKER: &[u8] = b"\xff\xffTOOBIG\xff\xff";

/// Largest datagram this process can send, measured once on first use.
static MAX_DATAGRAM: OnceLock<usize> = OnceLock::new();

/// Fallback when autodetection fails outright.
const FALLBACK_DATAGRAM: usize = 1472;

/// Probe the largest payload the local stack will accept, by binary search
/// over loopback sends.
fn detect_max_datagram() -> usize {
    let probe = || -> std::io::Result<Socket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        Ok(socket)
    };
    let Ok(socket) = probe() else {
        warn!("cannot create probe socket; fragmentation uses fallback size");
        return FALLBACK_DATAGRAM;
    };
    let target: SocketAddr = "127.0.0.1:9".parse().expect("static addr");

    let fits = |size: usize| socket.send_to(&vec![b'a'; size], &target.into()).is_ok();
    if !fits(1) {
        warn!("datagram size probe failed; fragmentation uses fallback size");
        return FALLBACK_DATAGRAM;
    }

    let (mut low, mut high) = (1usize, 65535usize);
    // Invariant: `low` fits, `high + 1` does not (or is past the UDP max).
    while low < high {
        let mid = low + (high - low).div_ceil(2);
        if fits(mid) {
            low = mid;
        } else {
            high = mid - 1;
        }
    }
    info!(max_datagram = low, "detected maximum UDP datagram size");
    low
}

/// Writes each record as one datagram, fragmenting records larger than the
/// process-wide maximum datagram size.
pub struct UdpWriter {
    socket: UdpSocket,
    destination: SocketAddr,
    num_retry: u32,
    eol: Option<String>,
    limiter: WarningLimiter,
    /// Explicit override of the autodetected maximum (mainly for tests and
    /// paths with a known smaller MTU).
    max_datagram: Option<usize>,
}

impl UdpWriter {
    /// `destination` empty means broadcast on all interfaces.
    pub fn new(
        destination: &str,
        port: u16,
        num_retry: u32,
        warning_limit: u32,
        eol: Option<&str>,
    ) -> Result<Self, DaqError> {
        let dest_ip: Ipv4Addr = if destination.is_empty() {
            Ipv4Addr::BROADCAST
        } else {
            destination
                .parse()
                .map_err(|_| DaqError::Config(format!("bad destination address {destination:?}")))?
        };

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_broadcast(true)?;
        socket.set_reuse_address(true)?;
        if dest_ip.is_multicast() {
            socket.set_multicast_ttl_v4(3)?;
        }
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket.into())?;

        Ok(UdpWriter {
            socket,
            destination: SocketAddr::V4(SocketAddrV4::new(dest_ip, port)),
            num_retry,
            eol: eol.map(ToOwned::to_owned),
            limiter: WarningLimiter::new(warning_limit),
            max_datagram: None,
        })
    }

    /// Cap datagrams at `size` instead of the autodetected maximum.
    pub fn with_max_datagram(mut self, size: usize) -> Result<Self, DaqError> {
        if size <= FRAGMENT_MARKER.len() {
            return Err(DaqError::Config(format!(
                "max datagram of {size} leaves no room for payload"
            )));
        }
        self.max_datagram = Some(size);
        Ok(self)
    }

    fn max_datagram(&self) -> usize {
        self.max_datagram
            .unwrap_or_else(|| *MAX_DATAGRAM.get_or_init(detect_max_datagram))
    }

    async fn send_datagram(&mut self, datagram: &[u8]) -> bool {
        let mut tries = 0;
        while tries <= self.num_retry {
            tries += 1;
            match self.socket.send_to(datagram, self.destination).await {
                Ok(_sent) => {
                    if self.limiter.on_success() {
                        info!(destination = %self.destination, "sends succeeding again");
                    }
                    return true;
                }
                Err(err) => {
                    if self.limiter.on_failure() {
                        error!(destination = %self.destination, error = %err, "send failed");
                        if self.limiter.just_muted() {
                            error!("muting further send errors");
                        }
                    }
                }
            }
        }
        false
    }

    async fn write_single(&mut self, record: Record) -> Result<(), DaqError> {
        let mut payload = record.to_wire_bytes()?;
        if let Some(eol) = &self.eol {
            payload.extend_from_slice(eol.as_bytes());
        }

        let max_datagram = self.max_datagram();
        let max_fragment = max_datagram - FRAGMENT_MARKER.len();
        let mut rest = payload.as_slice();
        let mut fragments = 0usize;
        while rest.len() > max_fragment {
            let mut datagram = rest[..max_fragment].to_vec();
            datagram.extend_from_slice(FRAGMENT_MARKER);
            if !self.send_datagram(&datagram).await {
                return Ok(()); // dropped; already logged per policy
            }
            fragments += 1;
            rest = &rest[max_fragment..];
        }
        if fragments > 0 {
            debug!(
                fragments = fragments + 1,
                bytes = payload.len(),
                "fragmented oversize record"
            );
        }
        self.send_datagram(rest).await;
        Ok(())
    }
}

#[async_trait]
impl Writer for UdpWriter {
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
