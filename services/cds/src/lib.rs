// cds: the Cached Data Server.
//
// Accepts records through pipeline writers, UDP ingest, or websocket
// `publish` requests, holds a time-windowed per-field cache, and serves
// pull-based subscription streams to websocket clients.

pub mod cache;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;

pub use cache::RecordCache;
pub use config::{CdsConfig, UdpSpec};
pub use server::CdsServer;
