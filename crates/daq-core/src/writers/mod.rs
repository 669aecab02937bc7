//! Concrete writers.

mod cds;
mod logfile;
mod socket;
mod tcp;
mod text_file;
mod udp;

pub use cds::CdsWriter;
pub use logfile::LogfileWriter;
pub use socket::SocketWriter;
pub use tcp::TcpWriter;
pub use text_file::TextFileWriter;
pub use udp::{FRAGMENT_MARKER, UdpWriter};
