use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

mod config;
mod error;
mod observability;
mod proxy;

use config::Config;
use observability::AccessLogger;
use proxy::HlsProxy;

#[derive(Parser, Debug)]
#[command(name = "hls-relay-proxy")]
#[command(about = "HLS proxy that rewrites playlists and relays segments with CORS headers")]
struct Args {
    /// Optional YAML file; environment variables override its values
    #[arg(short, long)]
    config: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Load and validate the configuration, print it, then exit
    #[arg(short, long)]
    validate_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    if args.validate_config {
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    observability::init_tracing(&config.logging)?;

    let runtime = if config.server.workers == 1 {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
    } else {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.server.workers)
            .enable_all()
            .build()
    }
    .context("Failed to build async runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    info!(
        "Starting HLS proxy with {} worker thread(s), chunk {} bytes, playlist limit {} bytes, segment limit {} bytes",
        config.server.workers,
        config.limits.chunk_size,
        config.limits.max_playlist_bytes,
        config.limits.max_segment_bytes,
    );
    if config.allowed_hosts.is_empty() {
        info!("No host allowlist configured, all origins are permitted");
    } else {
        info!("Allowed hosts: {}", config.allowed_hosts.join(", "));
    }

    let access_log = AccessLogger::new(&config.logging).await?;
    let proxy = Arc::new(HlsProxy::new(&config, access_log)?);

    proxy.serve(&config.server).await?;

    info!("HLS proxy shutdown complete");
    Ok(())
}
