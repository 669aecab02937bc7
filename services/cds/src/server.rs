//! The websocket endpoint and the cache-maintenance loop.

use crate::cache::RecordCache;
use crate::config::CdsConfig;
use crate::connection::serve_connection;
use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::any;
use das_record::timestamp;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone)]
struct CdsState {
    cache: Arc<RecordCache>,
    default_interval: f64,
    cancel: CancellationToken,
}

/// One cache, one websocket endpoint, one background cleanup task.
pub struct CdsServer {
    listener: TcpListener,
    cache: Arc<RecordCache>,
    config: CdsConfig,
    cancel: CancellationToken,
}

impl CdsServer {
    /// Bind the websocket port and (when configured) preload the cache from
    /// disk.  A bind failure is fatal to the enclosing process.
    pub async fn bind(config: CdsConfig, cancel: CancellationToken) -> std::io::Result<Self> {
        let cache = Arc::new(RecordCache::new());
        if let Some(disk_cache) = &config.disk_cache {
            cache.load_from_disk(disk_cache);
        }
        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        info!(addr = %listener.local_addr()?, "cached data server listening");
        Ok(CdsServer {
            listener,
            cache,
            config,
            cancel,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle onto the cache, for in-process publishers.
    pub fn cache(&self) -> Arc<RecordCache> {
        self.cache.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve until cancelled.  Spawns the cleanup loop, then runs the
    /// websocket acceptor with graceful shutdown.
    pub async fn run(self) -> std::io::Result<()> {
        let cleanup = tokio::spawn(cleanup_loop(
            self.cache.clone(),
            self.cancel.clone(),
            self.config.back_seconds,
            self.config.max_records,
            self.config.min_back_records,
            Duration::from_secs_f64(self.config.cleanup_interval),
            self.config.disk_cache.clone(),
        ));

        let state = CdsState {
            cache: self.cache.clone(),
            default_interval: self.config.interval,
            cancel: self.cancel.clone(),
        };
        let app = Router::new()
            .route("/", any(ws_handler))
            .route("/{*path}", any(ws_handler))
            .with_state(state);

        let cancel = self.cancel.clone();
        let served = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;

        // Final best-effort backup before exit.
        if let Some(disk_cache) = &self.config.disk_cache {
            self.cache.save_to_disk(disk_cache);
        }
        let _ = cleanup.await;
        info!("cached data server stopped");
        served
    }
}

/// Any path upgrades to the data websocket.
async fn ws_handler(State(state): State<CdsState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| {
        serve_connection(socket, state.cache, state.default_interval, state.cancel)
    })
}

/// Wake every `cleanup_interval`, expire old cache entries, and back the
/// cache up to disk when configured.
async fn cleanup_loop(
    cache: Arc<RecordCache>,
    cancel: CancellationToken,
    back_seconds: f64,
    max_records: usize,
    min_back_records: usize,
    cleanup_interval: Duration,
    disk_cache: Option<PathBuf>,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(cleanup_interval) => {}
        }
        let oldest = timestamp::now() - back_seconds;
        cache.cleanup(oldest, max_records, min_back_records);
        if let Some(disk_cache) = &disk_cache {
            cache.save_to_disk(disk_cache);
        }
    }
}

/// Bind-or-die helper for the binary: a failed bind is an init failure with
/// a non-zero exit, not something to retry.
pub async fn bind_or_exit(config: CdsConfig, cancel: CancellationToken) -> CdsServer {
    match CdsServer::bind(config, cancel).await {
        Ok(server) => server,
        Err(err) => {
            error!(error = %err, "cannot bind websocket port");
            std::process::exit(1);
        }
    }
}
