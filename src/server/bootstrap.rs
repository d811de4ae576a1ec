use crate::config::Settings;
use crate::server::{self, runtime::WorkerSizing, ProxyState};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Arguments forwarded from `main()`, already merged with the environment.
pub struct BootstrapArgs {
    pub settings: Settings,
    pub workers: WorkerSizing,
}

/// Proxy lifecycle: load → bind → serve → drain.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();
    tracing::info!(
        "server: runtime sized, workers={}, source={}",
        args.workers.threads,
        args.workers.source
    );

    // Any routing or client error aborts here, before the port is bound.
    let listen = args.settings.listen.clone();
    let state = ProxyState::load(args.settings)?;
    let listener = server::bind(&listen).await?;

    let shutdown = Arc::new(Notify::new());
    let proxy_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(listener, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    match proxy_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("server: proxy stopped with error: {:#}", e),
        Err(e) => tracing::error!("server: proxy task error: {}", e),
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    // Keep the writer alive for the whole process.
    std::mem::forget(_guard);
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("server: cannot install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_one();
}
