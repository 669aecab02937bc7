//! Concrete readers.

mod logfile;
mod register_poll;
mod serial;
pub(crate) mod socket;
mod tcp;
mod text_file;
mod udp;

pub use logfile::LogfileReader;
pub use register_poll::{ModbusTcpSource, PollSpec, RegisterFunction, RegisterPoller, RegisterSource};
pub use serial::SerialReader;
pub use socket::SocketReader;
pub use tcp::{TcpFraming, TcpReader};
pub use text_file::TextFileReader;
pub use udp::UdpReader;
