//! LabControl daemon entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lc_core::config::Settings;
use lc_server::{http, AppContext};
use tracing_subscriber::EnvFilter;

/// Lab hardware control and bookkeeping daemon.
#[derive(Parser, Debug)]
#[command(name = "labcontrol-daemon", version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the bind address.
    #[arg(long)]
    bind: Option<std::net::IpAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(data_dir) = args.data_dir {
        settings.data_dir = data_dir;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(bind) = args.bind {
        settings.bind_address = bind;
    }
    settings.validate().context("validating configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(data_dir = %settings.data_dir.display(), "starting labcontrol daemon");

    let ctx = AppContext::new(settings).context("initializing server state")?;
    http::serve(ctx).await
}
