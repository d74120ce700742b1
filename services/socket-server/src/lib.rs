pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::{Config, PresenceConfig};
use socket_core::codec;
use socket_core::error::{CodecError, PresenceError};
use socket_core::presence::{MemoryPresence, Presence, RedisPresence};
use socket_core::worker::{Worker, WorkerOpts};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid codec configuration: {0}")]
    Codec(#[from] CodecError),
    #[error("presence store setup failed: {0}")]
    Presence(#[from] PresenceError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("http server error: {0}")]
    Http(std::io::Error),
}

pub async fn run(config: Config) -> Result<(), RunError> {
    let codec = codec::by_name(&config.tcp.codec, config.tcp.secret.as_bytes())?;
    let presence = match config.tcp.presence {
        PresenceConfig::Memory => Presence::Memory(MemoryPresence::new()),
        PresenceConfig::Remote { redis_url } => Presence::Remote(RedisPresence::new(&redis_url)?),
    };

    let token = CancellationToken::new();
    let worker = Worker::new(WorkerOpts {
        id: 1,
        codec: codec.into(),
        presence: Arc::new(presence),
        global_handler: None,
        parent_token: token.clone(),
    });

    let tcp_addr: SocketAddr = format!("{}:{}", config.tcp.host, config.tcp.port)
        .parse()
        .expect("invalid tcp host/port");
    let tcp_listener = TcpListener::bind(tcp_addr)
        .await
        .map_err(|source| RunError::Bind {
            addr: tcp_addr,
            source,
        })?;
    info!(addr = %tcp_addr, "tcp listener bound");

    let http_addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port)
        .parse()
        .expect("invalid http host/port");
    let http_listener = TcpListener::bind(http_addr)
        .await
        .map_err(|source| RunError::Bind {
            addr: http_addr,
            source,
        })?;
    info!(addr = %http_addr, "http admin listener bound");

    let accept_token = token.clone();
    let accept_worker = Arc::clone(&worker);
    let accept_task = tokio::spawn(async move {
        accept_loop(accept_worker, tcp_listener, accept_token).await;
    });

    let router = socket_admin::router(Arc::clone(&worker));
    axum::serve(http_listener, router)
        .with_graceful_shutdown(shutdown_signal(token.clone()))
        .await
        .map_err(RunError::Http)?;

    token.cancel();
    let _ = accept_task.await;
    info!("shut down gracefully");
    Ok(())
}

async fn accept_loop(worker: Arc<Worker>, listener: TcpListener, token: CancellationToken) {
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, addr)) => {
                    info!(%addr, "tcp connection accepted");
                    let worker = Arc::clone(&worker);
                    tokio::spawn(async move {
                        worker.admit(socket).await;
                    });
                }
                Err(err) => warn!(%err, "tcp accept failed"),
            },
        }
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and cancels `token` so both the
/// admin HTTP server and the TCP accept loop shut down together.
async fn shutdown_signal(token: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
    token.cancel();
}
