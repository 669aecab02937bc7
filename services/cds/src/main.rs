use clap::Parser;
use cds::config::{CdsConfig, UdpSpec};
use cds::server::bind_or_exit;
use daq_core::encoding::{Encoding, EncodingErrors};
use daq_core::readers::UdpReader;
use daq_core::transforms::FromJsonTransform;
use daq_core::{ComposedReader, Reader, Transform};
use das_record::Record;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cds", about = "Cached data server: websocket access to live field data")]
struct Args {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Websocket port (overrides the config file).
    #[arg(long)]
    port: Option<u16>,
    /// Comma-separated UDP ports to ingest, e.g. "6221,239.1.1.1:6224"
    /// (overrides the config file).
    #[arg(long)]
    udp: Option<String>,
    /// Directory for the disk cache backup (overrides the config file).
    #[arg(long)]
    disk_cache: Option<PathBuf>,
}

fn load_config(args: &Args) -> CdsConfig {
    let mut config = match &args.config {
        Some(path) => CdsConfig::load(path).unwrap_or_else(|err| {
            eprintln!("FATAL: {err}");
            std::process::exit(1);
        }),
        None => CdsConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(disk_cache) = &args.disk_cache {
        config.disk_cache = Some(disk_cache.clone());
    }
    if let Some(udp) = &args.udp {
        config.udp = udp
            .split(',')
            .map(|spec| {
                UdpSpec::parse(spec.trim()).unwrap_or_else(|err| {
                    eprintln!("FATAL: {err}");
                    std::process::exit(1);
                })
            })
            .collect();
    }
    config
}

/// Read JSON records off the configured UDP ports and feed them into the
/// cache until shutdown.
async fn run_udp_ingest(
    specs: Vec<UdpSpec>,
    cache: std::sync::Arc<cds::RecordCache>,
    cancel: CancellationToken,
) {
    let mut readers: Vec<Box<dyn Reader>> = Vec::new();
    for spec in &specs {
        match UdpReader::new(
            spec.port,
            &spec.group,
            None,
            4096,
            Encoding::Utf8,
            EncodingErrors::Ignore,
        ) {
            Ok(reader) => readers.push(Box::new(reader)),
            Err(err) => {
                error!(port = spec.port, error = %err, "cannot open ingest port");
                std::process::exit(1);
            }
        }
    }
    let transforms: Vec<Box<dyn Transform>> =
        vec![Box::new(FromJsonTransform::new())];
    let mut reader =
        match ComposedReader::with_cancel(readers, transforms, false, cancel.clone()) {
            Ok(reader) => reader,
            Err(err) => {
                error!(error = %err, "cannot build ingest reader");
                std::process::exit(1);
            }
        };

    info!(ports = specs.len(), "UDP ingest running");
    loop {
        match reader.read().await {
            Ok(Some(Record::Das(record))) => cache.cache_record(&record),
            Ok(Some(Record::Many(records))) => {
                for record in records {
                    if let Record::Das(record) = record {
                        cache.cache_record(&record);
                    }
                }
            }
            Ok(Some(_other)) => {}
            Ok(None) => break,
            Err(err) => warn!(error = %err, "ingest read failed"),
        }
    }
    info!("UDP ingest stopped");
}

/// Translate SIGTERM / ctrl-c into a cooperative quit.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(&args);
    let cancel = CancellationToken::new();

    info!(port = config.port, "starting cached data server");
    let server = bind_or_exit(config.clone(), cancel.clone()).await;
    let cache = server.cache();

    let ingest = if config.udp.is_empty() {
        None
    } else {
        Some(tokio::spawn(run_udp_ingest(
            config.udp.clone(),
            cache,
            cancel.clone(),
        )))
    };

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    if let Err(err) = server.run().await {
        error!(error = %err, "server failed");
        std::process::exit(1);
    }
    if let Some(ingest) = ingest {
        let _ = ingest.await;
    }
}
