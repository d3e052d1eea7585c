use anyhow::{Context, Result};
use corncare::config::Config;
use corncare::routes;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "corncare=info";

fn main() {
    if let Err(err) = run() {
        eprintln!("failed to launch app: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    let config = Config::from_env();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(routes::serve(config))
}
