//! Cached Data Server configuration loading.
//!
//! TOML is the config source; every field has a default, and the command
//! line may override the port, UDP listen specs, and disk cache location.
//!
//! ```toml
//! [server]
//! port = 8766
//! interval = 0.5
//!
//! [cache]
//! back_seconds = 86400
//! max_records = 2880
//! min_back_records = 64
//! cleanup_interval = 60
//! disk_cache = "/var/tmp/seadaq/disk_cache"
//!
//! [ingest]
//! udp = ["6221", "239.1.1.1:6224"]
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A UDP listen spec: a bare port, or `group:port` for multicast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpSpec {
    pub group: String,
    pub port: u16,
}

impl UdpSpec {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (group, port) = match spec.rsplit_once(':') {
            Some((group, port)) => (group.to_owned(), port),
            None => (String::new(), spec),
        };
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad UDP spec {spec:?}")))?;
        Ok(UdpSpec { group, port })
    }
}

// ---------------------------------------------------------------------------
// Validated config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CdsConfig {
    /// Websocket listen port.
    pub port: u16,
    /// Default seconds between `ready` deliveries.
    pub interval: f64,
    /// How many seconds of back data to retain.
    pub back_seconds: f64,
    /// Per-field record cap (0 = unbounded).
    pub max_records: usize,
    /// Entries always preserved per field when purging old data.
    pub min_back_records: usize,
    /// Seconds between cleanup (and disk backup) passes.
    pub cleanup_interval: f64,
    /// Directory for the per-field disk backup, if any.
    pub disk_cache: Option<PathBuf>,
    /// UDP ports to ingest records from.
    pub udp: Vec<UdpSpec>,
}

impl Default for CdsConfig {
    fn default() -> Self {
        CdsConfig {
            port: 8766,
            interval: 1.0,
            back_seconds: 24.0 * 60.0 * 60.0,
            max_records: 24 * 60 * 2,
            min_back_records: 64,
            cleanup_interval: 60.0,
            disk_cache: None,
            udp: Vec::new(),
        }
    }
}

impl CdsConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        let defaults = CdsConfig::default();

        let server = raw.server.unwrap_or_default();
        let cache = raw.cache.unwrap_or_default();
        let ingest = raw.ingest.unwrap_or_default();

        let config = CdsConfig {
            port: server.port.unwrap_or(defaults.port),
            interval: server.interval.unwrap_or(defaults.interval),
            back_seconds: cache.back_seconds.unwrap_or(defaults.back_seconds),
            max_records: cache.max_records.unwrap_or(defaults.max_records),
            min_back_records: cache.min_back_records.unwrap_or(defaults.min_back_records),
            cleanup_interval: cache.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            disk_cache: cache.disk_cache.map(PathBuf::from),
            udp: ingest
                .udp
                .unwrap_or_default()
                .iter()
                .map(|spec| UdpSpec::parse(spec))
                .collect::<Result<_, _>>()?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval <= 0.0 {
            return Err(ConfigError::Invalid("interval must be positive".to_owned()));
        }
        if self.back_seconds <= 0.0 {
            return Err(ConfigError::Invalid(
                "back_seconds must be positive".to_owned(),
            ));
        }
        if self.cleanup_interval <= 0.0 {
            return Err(ConfigError::Invalid(
                "cleanup_interval must be positive".to_owned(),
            ));
        }
        if self.max_records != 0 && self.max_records <= self.min_back_records {
            return Err(ConfigError::Invalid(
                "max_records must exceed min_back_records (or be 0 for unbounded)".to_owned(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    server: Option<RawServer>,
    cache: Option<RawCache>,
    ingest: Option<RawIngest>,
}

#[derive(Debug, Default, Deserialize)]
struct RawServer {
    port: Option<u16>,
    interval: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCache {
    back_seconds: Option<f64>,
    max_records: Option<usize>,
    min_back_records: Option<usize>,
    cleanup_interval: Option<f64>,
    disk_cache: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawIngest {
    udp: Option<Vec<String>>,
}
