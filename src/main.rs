#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use rulegate::config::Settings;
use rulegate::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rulegate", about = "Config-driven reverse proxy routing engine")]
struct Cli {
    /// Routing document (.yaml, .yml, .toml or .json); overrides RULEGATE_ROUTING_CONFIG_PATH
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address; overrides RULEGATE_LISTEN
    #[arg(short, long)]
    listen: Option<String>,

    /// Answer every error with a generic 400; overrides RULEGATE_HIDE_ERROR_MESSAGE
    #[arg(long)]
    hide_error_message: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(config) = cli.config {
        settings.routing_config_path = config;
    }
    if let Some(listen) = cli.listen {
        settings.listen = listen;
    }
    if cli.hide_error_message {
        settings.hide_error_message = true;
    }

    let workers = server::runtime::worker_threads();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers.threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        settings,
        workers,
    }))
}
