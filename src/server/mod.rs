pub mod bootstrap;
pub mod runtime;
mod state;

pub use state::ProxyState;

use crate::proxy;
use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Bind the proxy listener.
pub async fn bind(listen: &str) -> Result<TcpListener> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address '{listen}'"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    Ok(listener)
}

/// Serve the proxy on `listener` until `shutdown` is notified.
///
/// On shutdown the listener is closed, idle connections are told to finish,
/// and in-flight requests get up to `DRAIN_TIMEOUT` before being dropped.
pub async fn run_proxy_server(
    listener: TcpListener,
    state: ProxyState,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!("server: proxy listening, addr={}", local_addr);

    let builder = auto::Builder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();
    let active_conns = Arc::new(AtomicUsize::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: proxy: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => v,
            Err(e) => {
                error!("server: proxy: accept failed, error={}", e);
                continue;
            }
        };

        let state = state.clone();
        let svc = service_fn(move |req: Request<Incoming>| {
            let state = state.clone();
            async move { proxy::handle_request(req, state, peer_addr).await }
        });
        let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), svc);
        let conn = graceful.watch(conn.into_owned());

        active_conns.fetch_add(1, Ordering::Relaxed);
        let active_conns = active_conns.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                if !e.to_string().contains("connection closed") {
                    error!(
                        "server: proxy: connection error, peer={}, error={}",
                        peer_addr, e
                    );
                }
            }
            active_conns.fetch_sub(1, Ordering::Relaxed);
        });
    }

    drop(listener);
    let active = active_conns.load(Ordering::Relaxed);
    if active > 0 {
        info!(
            "server: proxy: waiting for {} active connections to drain",
            active
        );
    }
    match tokio::time::timeout(DRAIN_TIMEOUT, graceful.shutdown()).await {
        Ok(_) => info!("server: proxy: all connections drained"),
        Err(_) => warn!(
            "server: proxy: drain timeout ({}s), {} connections still active",
            DRAIN_TIMEOUT.as_secs(),
            active_conns.load(Ordering::Relaxed)
        ),
    }

    Ok(())
}
